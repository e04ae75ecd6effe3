use crate::gate::{GateDecision, SequentialGate};
use crate::ledger::{LedgerManager, TxMeta};
use crate::storage::RewardStore;
use crate::types::{DailyTaskSession, RatingRecord, RecordStatus, TaskRecord, TransactionType};
use chrono::{DateTime, NaiveDate, Utc};
use reward_types::{AccountId, EngineError, ProductId, Result, SignedUsd, UsdAmount};
use std::sync::Arc;
use tracing::info;

pub const REQUIRED_RATING: u8 = 5;

#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub account: AccountId,
    pub product: ProductId,
    pub rating: u8,
    /// Set when this settlement is the retry after a confirmed lucky order.
    pub lucky_commission: Option<UsdAmount>,
}

#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub profit: SignedUsd,
    pub new_balance: UsdAmount,
    pub task: TaskRecord,
}

/// Task Settlement: validates, consults the gate and the ledger, and applies
/// balance + records + ledger entry as one atomic unit. The caller holds the
/// account's writer lock for the whole operation and passes `now` in, so the
/// gate check and the record's day stamp share one calendar-day boundary
/// even when the operation straddles midnight.
pub struct TaskSettlement {
    store: Arc<dyn RewardStore>,
    ledger: Arc<LedgerManager>,
    gate: Arc<SequentialGate>,
}

impl TaskSettlement {
    pub fn new(
        store: Arc<dyn RewardStore>,
        ledger: Arc<LedgerManager>,
        gate: Arc<SequentialGate>,
    ) -> Self {
        Self {
            store,
            ledger,
            gate,
        }
    }

    pub async fn settle(
        &self,
        request: &SettleRequest,
        session: Option<&DailyTaskSession>,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome> {
        if request.rating != REQUIRED_RATING {
            return Err(EngineError::Validation(
                "Only 5-star ratings are allowed".to_string(),
            ));
        }

        let account = self
            .store
            .get_account(request.account)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownAccount)?;

        let product = self
            .store
            .get_product(request.product)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownProduct)?;
        if !product.is_active {
            return Err(EngineError::Validation(format!(
                "Product \"{}\" is not active",
                product.name
            )));
        }

        let today = now.date_naive();
        match self
            .gate
            .can_settle(request.account, request.product, today)
            .await
            .map_err(EngineError::Internal)?
        {
            GateDecision::Allowed => {}
            GateDecision::AlreadyCompleted => return Err(EngineError::DuplicateCompletion),
            GateDecision::Blocked(blocking) => {
                return Err(EngineError::Ordering {
                    blocking_product: blocking.name,
                })
            }
        }

        if account.balance < product.price {
            let shortfall = product.price.saturating_sub(account.balance);
            return Err(EngineError::InsufficientBalance { shortfall });
        }

        // All preconditions passed; apply atomically.
        self.store
            .begin_transaction()
            .await
            .map_err(EngineError::Internal)?;
        match self.settle_inner(request, session, &product, today, now).await {
            Ok(outcome) => {
                self.store
                    .commit_transaction()
                    .await
                    .map_err(EngineError::Internal)?;
                info!(
                    account = %request.account,
                    product = %product.name,
                    profit = outcome.profit.to_usd(),
                    new_balance = outcome.new_balance.to_usd(),
                    session = session.is_some(),
                    lucky = request.lucky_commission.is_some(),
                    "✅ Task settled"
                );
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.store.rollback_transaction().await;
                Err(EngineError::Internal(e))
            }
        }
    }

    async fn settle_inner(
        &self,
        request: &SettleRequest,
        session: Option<&DailyTaskSession>,
        product: &crate::types::Product,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<SettlementOutcome> {
        let commission = request.lucky_commission.unwrap_or(UsdAmount::ZERO);

        let mut meta = TxMeta::new(
            TransactionType::ChildOwnTask,
            format!("Task settled for {}", product.name),
        )
        .with_product(product.id);
        if let Some(session) = session {
            meta = meta.with_session(session.id);
        }

        let (new_balance, profit) = self
            .ledger
            .apply_settlement(request.account, product.price, product.reward, meta)
            .await?;

        let task = TaskRecord {
            owner: request.account,
            product: product.id,
            session: session.map(|s| s.id),
            day: today,
            reward: product.reward,
            product_price: product.price,
            profit,
            commission,
            is_lucky_order: request.lucky_commission.is_some(),
            status: RecordStatus::Completed,
            created_at: now,
        };
        self.store.insert_task(task.clone()).await?;

        // Simple mode mirrors the task as a rating record.
        if session.is_none() {
            self.store
                .insert_rating(RatingRecord {
                    owner: request.account,
                    product: product.id,
                    day: today,
                    rating: request.rating,
                    reward: product.reward,
                    product_price: product.price,
                    profit,
                    status: RecordStatus::Completed,
                    created_at: now,
                })
                .await?;
        }

        Ok(SettlementOutcome {
            profit,
            new_balance,
            task,
        })
    }
}
