use crate::clock::DayClock;
use crate::storage::RewardStore;
use crate::types::{Account, LedgerTransaction, TransactionType, TxDirection, TxStatus};
use anyhow::{bail, Result};
use reward_types::{AccountId, ProductId, SessionId, SignedUsd, UsdAmount};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

/// Attribution and bookkeeping attached to a ledger mutation.
#[derive(Debug, Clone)]
pub struct TxMeta {
    pub tx_type: TransactionType,
    pub description: String,
    pub from: Option<AccountId>,
    pub to: Option<AccountId>,
    pub session: Option<SessionId>,
    pub product: Option<ProductId>,
    pub commission_rate: f64,
    pub commission_amount: UsdAmount,
}

impl TxMeta {
    pub fn new(tx_type: TransactionType, description: impl Into<String>) -> Self {
        Self {
            tx_type,
            description: description.into(),
            from: None,
            to: None,
            session: None,
            product: None,
            commission_rate: 0.0,
            commission_amount: UsdAmount::ZERO,
        }
    }

    pub fn from_account(mut self, from: AccountId) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_product(mut self, product: ProductId) -> Self {
        self.product = Some(product);
        self
    }

    pub fn with_commission(mut self, rate: f64, amount: UsdAmount) -> Self {
        self.commission_rate = rate;
        self.commission_amount = amount;
        self
    }
}

/// Account Ledger. Owns every balance mutation; each one is recorded as a
/// `LedgerTransaction`. Callers serialize whole operations through
/// `lock_account`; the primitives here do not take the account lock
/// themselves.
pub struct LedgerManager {
    store: Arc<dyn RewardStore>,
    clock: Arc<dyn DayClock>,
    locks: RwLock<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl LedgerManager {
    pub fn new(store: Arc<dyn RewardStore>, clock: Arc<dyn DayClock>) -> Self {
        Self {
            store,
            clock,
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Single-writer-per-account guard. Held across a whole engine operation
    /// so two concurrent settlements cannot both read a stale balance.
    pub async fn lock_account(&self, id: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write().await;
            locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    pub async fn require_account(&self, id: AccountId) -> Result<Account> {
        match self.store.get_account(id).await? {
            Some(account) => Ok(account),
            None => bail!("Account not found: {}", id),
        }
    }

    pub async fn balance(&self, id: AccountId) -> Result<UsdAmount> {
        Ok(self.require_account(id).await?.balance)
    }

    /// Credit `amount` to `to`. Attribution `from` defaults to the platform
    /// account; a `ParentChildReward` names the child instead.
    pub async fn credit(
        &self,
        to: AccountId,
        amount: UsdAmount,
        meta: TxMeta,
    ) -> Result<(UsdAmount, LedgerTransaction)> {
        let mut account = self.require_account(to).await?;
        let before = account.balance;
        account.balance = before
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("Balance overflow for {}", to))?;
        let after = account.balance;
        self.store.put_account(account).await?;

        let tx = self.build_tx(
            meta.from.unwrap_or_else(AccountId::platform),
            to,
            amount,
            TxDirection::CreditTo,
            meta,
        );
        self.store.record_transaction(tx.clone()).await?;

        info!(
            account = %to,
            amount = amount.to_usd(),
            balance_before = before.to_usd(),
            balance_after = after.to_usd(),
            tx_type = ?tx.tx_type,
            "💰 Balance credited"
        );
        Ok((after, tx))
    }

    /// Debit `amount` from `from`. Fails without effect when the balance
    /// would go negative.
    pub async fn debit(
        &self,
        from: AccountId,
        amount: UsdAmount,
        meta: TxMeta,
    ) -> Result<UsdAmount> {
        if amount.is_zero() {
            return self.balance(from).await;
        }

        let mut account = self.require_account(from).await?;
        let before = account.balance;
        account.balance = before.checked_sub(amount).ok_or_else(|| {
            anyhow::anyhow!(
                "Insufficient balance for {}: has {}, needs {}",
                from,
                before,
                amount
            )
        })?;
        let after = account.balance;
        self.store.put_account(account).await?;

        let tx = self.build_tx(
            from,
            meta.to.unwrap_or_else(AccountId::platform),
            amount,
            TxDirection::DebitFrom,
            meta,
        );
        self.store.record_transaction(tx.clone()).await?;

        info!(
            account = %from,
            amount = amount.to_usd(),
            balance_before = before.to_usd(),
            balance_after = after.to_usd(),
            tx_type = ?tx.tx_type,
            "💸 Balance debited"
        );
        Ok(after)
    }

    /// Apply a task settlement's net effect (`balance − price + reward`) as a
    /// single reconciling `ChildOwnTask` entry. The caller checks the
    /// insufficient-balance precondition; this re-checks under write.
    pub async fn apply_settlement(
        &self,
        account_id: AccountId,
        price: UsdAmount,
        reward: UsdAmount,
        meta: TxMeta,
    ) -> Result<(UsdAmount, SignedUsd)> {
        let mut account = self.require_account(account_id).await?;
        let before = account.balance;

        let debited = before.checked_sub(price).ok_or_else(|| {
            anyhow::anyhow!(
                "Insufficient balance for {}: has {}, needs {}",
                account_id,
                before,
                price
            )
        })?;
        account.balance = debited
            .checked_add(reward)
            .ok_or_else(|| anyhow::anyhow!("Balance overflow for {}", account_id))?;

        let profit = reward.signed_sub(price);
        if !profit.is_negative() {
            account.total_earnings_today =
                account.total_earnings_today.saturating_add(profit.abs_amount());
        }
        let after = account.balance;
        self.store.put_account(account).await?;

        // Negative profit settles as a debit against the platform account.
        let tx = if profit.is_negative() {
            self.build_tx(
                account_id,
                AccountId::platform(),
                profit.abs_amount(),
                TxDirection::DebitFrom,
                meta,
            )
        } else {
            self.build_tx(
                AccountId::platform(),
                account_id,
                profit.abs_amount(),
                TxDirection::CreditTo,
                meta,
            )
        };
        self.store.record_transaction(tx).await?;

        info!(
            account = %account_id,
            price = price.to_usd(),
            reward = reward.to_usd(),
            profit = profit.to_usd(),
            balance_before = before.to_usd(),
            balance_after = after.to_usd(),
            "✅ Settlement applied"
        );
        Ok((after, profit))
    }

    /// Move `amount` between two real accounts (both sides applied). Like
    /// the other primitives, the caller wraps this in a store transaction
    /// when it is part of a larger atomic operation.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: UsdAmount,
        meta: TxMeta,
    ) -> Result<()> {
        if from == to {
            bail!("Cannot transfer to same account");
        }
        if amount.is_zero() {
            return Ok(());
        }

        let mut sender = self.require_account(from).await?;
        sender.balance = sender.balance.checked_sub(amount).ok_or_else(|| {
            anyhow::anyhow!(
                "Insufficient balance for {}: has {}, needs {}",
                from,
                sender.balance,
                amount
            )
        })?;
        let mut receiver = self.require_account(to).await?;
        receiver.balance = receiver
            .balance
            .checked_add(amount)
            .ok_or_else(|| anyhow::anyhow!("Balance overflow for {}", to))?;

        self.store.put_account(sender).await?;
        self.store.put_account(receiver).await?;

        let tx = self.build_tx(from, to, amount, TxDirection::Transfer, meta);
        self.store.record_transaction(tx).await?;

        info!(
            from = %from,
            to = %to,
            amount = amount.to_usd(),
            "💸 Transfer applied"
        );
        Ok(())
    }

    pub async fn history(&self, account: AccountId) -> Result<Vec<LedgerTransaction>> {
        self.store.transaction_history(account).await
    }

    fn build_tx(
        &self,
        from: AccountId,
        to: AccountId,
        amount: UsdAmount,
        direction: TxDirection,
        meta: TxMeta,
    ) -> LedgerTransaction {
        let now = self.clock.now();

        let mut hasher = blake3::Hasher::new();
        hasher.update(from.as_bytes());
        hasher.update(to.as_bytes());
        hasher.update(&amount.to_base_units().to_le_bytes());
        hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(meta.description.as_bytes());
        let tx_hash = hex::encode(hasher.finalize().as_bytes());

        LedgerTransaction {
            tx_hash,
            from,
            to,
            session: meta.session,
            product: meta.product,
            tx_type: meta.tx_type,
            direction,
            amount,
            commission_rate: meta.commission_rate,
            commission_amount: meta.commission_amount,
            status: TxStatus::Completed,
            description: meta.description,
            processed_at: now,
        }
    }
}
