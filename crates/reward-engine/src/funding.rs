use crate::clock::DayClock;
use crate::config::EngineConfig;
use crate::ledger::{LedgerManager, TxMeta};
use crate::storage::RewardStore;
use crate::types::{DepositRequest, FundingStatus, TransactionType, WithdrawalRequest};
use reward_types::{AccountId, EngineError, Result, UsdAmount};
use std::sync::Arc;
use tracing::info;

/// Deposits and withdrawals are externally-approved requests; the engine
/// records them and applies the ledger effect only on approval.
pub struct FundingDesk {
    store: Arc<dyn RewardStore>,
    ledger: Arc<LedgerManager>,
    clock: Arc<dyn DayClock>,
    config: EngineConfig,
}

impl FundingDesk {
    pub fn new(
        store: Arc<dyn RewardStore>,
        ledger: Arc<LedgerManager>,
        clock: Arc<dyn DayClock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            config,
        }
    }

    pub async fn request_deposit(
        &self,
        account: AccountId,
        amount: UsdAmount,
        method: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<DepositRequest> {
        if amount.is_zero() {
            return Err(EngineError::Validation(
                "Deposit amount must be positive".to_string(),
            ));
        }
        self.require_account(account).await?;

        let now = self.clock.now();
        let request = DepositRequest {
            id: request_id("dep", account, amount, now),
            account,
            amount,
            fee: UsdAmount::ZERO,
            method: method.into(),
            address: address.into(),
            status: FundingStatus::Pending,
            created_at: now,
            processed_at: None,
        };
        self.store
            .put_deposit(request.clone())
            .await
            .map_err(EngineError::Internal)?;
        Ok(request)
    }

    pub async fn approve_deposit(&self, id: &str) -> Result<DepositRequest> {
        let mut request = self.pending_deposit(id).await?;

        let _guard = self.ledger.lock_account(request.account).await;
        self.ledger
            .credit(
                request.account,
                request.amount,
                TxMeta::new(TransactionType::Deposit, "Deposit approved"),
            )
            .await
            .map_err(EngineError::Internal)?;

        request.status = FundingStatus::Approved;
        request.processed_at = Some(self.clock.now());
        self.store
            .put_deposit(request.clone())
            .await
            .map_err(EngineError::Internal)?;

        info!(
            request = %request.id,
            account = %request.account,
            amount = request.amount.to_usd(),
            "💵 Deposit approved"
        );
        Ok(request)
    }

    pub async fn reject_deposit(&self, id: &str) -> Result<DepositRequest> {
        let mut request = self.pending_deposit(id).await?;
        request.status = FundingStatus::Rejected;
        request.processed_at = Some(self.clock.now());
        self.store
            .put_deposit(request.clone())
            .await
            .map_err(EngineError::Internal)?;
        Ok(request)
    }

    pub async fn request_withdrawal(
        &self,
        account: AccountId,
        amount: UsdAmount,
        method: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<WithdrawalRequest> {
        if amount.is_zero() {
            return Err(EngineError::Validation(
                "Withdrawal amount must be positive".to_string(),
            ));
        }
        let balance = self.require_account(account).await?;
        let fee = self.config.withdrawal_fee;
        let total = amount.saturating_add(fee);
        if balance < total {
            return Err(EngineError::InsufficientBalance {
                shortfall: total.saturating_sub(balance),
            });
        }

        let now = self.clock.now();
        let request = WithdrawalRequest {
            id: request_id("wd", account, amount, now),
            account,
            amount,
            fee,
            method: method.into(),
            address: address.into(),
            status: FundingStatus::Pending,
            created_at: now,
            processed_at: None,
        };
        self.store
            .put_withdrawal(request.clone())
            .await
            .map_err(EngineError::Internal)?;
        Ok(request)
    }

    pub async fn approve_withdrawal(&self, id: &str) -> Result<WithdrawalRequest> {
        let mut request = self.pending_withdrawal(id).await?;

        let _guard = self.ledger.lock_account(request.account).await;
        let total = request.amount.saturating_add(request.fee);
        let balance = self.require_account(request.account).await?;
        if balance < total {
            // Spent in the meantime; the request stays pending.
            return Err(EngineError::InsufficientBalance {
                shortfall: total.saturating_sub(balance),
            });
        }

        self.ledger
            .debit(
                request.account,
                total,
                TxMeta::new(TransactionType::Withdrawal, "Withdrawal approved")
                    .with_commission(0.0, request.fee),
            )
            .await
            .map_err(EngineError::Internal)?;

        request.status = FundingStatus::Approved;
        request.processed_at = Some(self.clock.now());
        self.store
            .put_withdrawal(request.clone())
            .await
            .map_err(EngineError::Internal)?;

        info!(
            request = %request.id,
            account = %request.account,
            amount = request.amount.to_usd(),
            fee = request.fee.to_usd(),
            "🏧 Withdrawal approved"
        );
        Ok(request)
    }

    pub async fn reject_withdrawal(&self, id: &str) -> Result<WithdrawalRequest> {
        let mut request = self.pending_withdrawal(id).await?;
        request.status = FundingStatus::Rejected;
        request.processed_at = Some(self.clock.now());
        self.store
            .put_withdrawal(request.clone())
            .await
            .map_err(EngineError::Internal)?;
        Ok(request)
    }

    async fn require_account(&self, id: AccountId) -> Result<UsdAmount> {
        self.store
            .get_account(id)
            .await
            .map_err(EngineError::Internal)?
            .map(|a| a.balance)
            .ok_or(EngineError::UnknownAccount)
    }

    async fn pending_deposit(&self, id: &str) -> Result<DepositRequest> {
        let request = self
            .store
            .get_deposit(id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| EngineError::Validation("Deposit request not found".to_string()))?;
        if request.status != FundingStatus::Pending {
            return Err(EngineError::Validation(
                "Deposit request already processed".to_string(),
            ));
        }
        Ok(request)
    }

    async fn pending_withdrawal(&self, id: &str) -> Result<WithdrawalRequest> {
        let request = self
            .store
            .get_withdrawal(id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| EngineError::Validation("Withdrawal request not found".to_string()))?;
        if request.status != FundingStatus::Pending {
            return Err(EngineError::Validation(
                "Withdrawal request already processed".to_string(),
            ));
        }
        Ok(request)
    }
}

fn request_id(
    prefix: &str,
    account: AccountId,
    amount: UsdAmount,
    now: chrono::DateTime<chrono::Utc>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(account.as_bytes());
    hasher.update(&amount.to_base_units().to_le_bytes());
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    format!("{}_{}", prefix, hex::encode(&hasher.finalize().as_bytes()[..16]))
}
