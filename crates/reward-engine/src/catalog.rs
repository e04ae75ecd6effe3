use crate::storage::RewardStore;
use crate::types::Product;
use anyhow::Result;
use reward_types::ProductId;
use std::sync::Arc;

/// Read-only view of the product catalog. The active list, in catalog
/// insertion order, defines the daily rating sequence.
pub struct ProductCatalog {
    store: Arc<dyn RewardStore>,
}

impl ProductCatalog {
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        Self { store }
    }

    pub async fn active(&self) -> Result<Vec<Product>> {
        self.store.active_products().await
    }

    pub async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        self.store.get_product(id).await
    }

    pub fn position(products: &[Product], id: ProductId) -> Option<usize> {
        products.iter().position(|p| p.id == id)
    }
}
