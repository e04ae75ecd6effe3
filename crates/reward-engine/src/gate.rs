use crate::catalog::ProductCatalog;
use crate::storage::RewardStore;
use crate::types::Product;
use anyhow::{bail, Result};
use chrono::NaiveDate;
use reward_types::{AccountId, ProductId};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum GateDecision {
    Allowed,
    /// A record for this product already exists today.
    AlreadyCompleted,
    /// An earlier-ordered product has no completion record today.
    Blocked(Product),
}

/// Sequential Gate: products must be completed in catalog order within a
/// calendar day. Read-only; both TaskRecords and RatingRecords count as
/// completion evidence.
pub struct SequentialGate {
    store: Arc<dyn RewardStore>,
    catalog: Arc<ProductCatalog>,
}

impl SequentialGate {
    pub fn new(store: Arc<dyn RewardStore>, catalog: Arc<ProductCatalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn can_settle(
        &self,
        account: AccountId,
        product: ProductId,
        today: NaiveDate,
    ) -> Result<GateDecision> {
        if self.completed_today(account, product, today).await? {
            return Ok(GateDecision::AlreadyCompleted);
        }

        let products = self.catalog.active().await?;
        let Some(index) = ProductCatalog::position(&products, product) else {
            bail!("Product {} is not in the active catalog", product);
        };

        for earlier in &products[..index] {
            if !self.completed_today(account, earlier.id, today).await? {
                debug!(
                    account = %account,
                    product = %product,
                    blocking = %earlier.name,
                    "Sequential gate denied"
                );
                return Ok(GateDecision::Blocked(earlier.clone()));
            }
        }

        Ok(GateDecision::Allowed)
    }

    async fn completed_today(
        &self,
        account: AccountId,
        product: ProductId,
        day: NaiveDate,
    ) -> Result<bool> {
        Ok(self.store.task_exists(account, product, day).await?
            || self.store.rating_exists(account, product, day).await?)
    }
}
