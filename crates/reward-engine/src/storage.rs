use crate::types::{
    Account, DailyTaskSession, DepositRequest, LedgerTransaction, Product, RatingRecord,
    SessionStatus, TaskRecord, WithdrawalRequest,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reward_types::{AccountId, ProductId, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

type AccountMap = HashMap<AccountId, Account>;
type SessionMap = HashMap<SessionId, DailyTaskSession>;

/// Mutable state captured by `begin_transaction` for rollback. Products are
/// excluded: the catalog is read-only to the engine.
type StoreBackup = Option<(
    AccountMap,
    SessionMap,
    Vec<TaskRecord>,
    Vec<RatingRecord>,
    Vec<LedgerTransaction>,
)>;

#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;
    async fn put_account(&self, account: Account) -> Result<()>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;
    async fn put_product(&self, product: Product) -> Result<()>;
    /// All active products, sorted by catalog insertion order.
    async fn active_products(&self) -> Result<Vec<Product>>;

    async fn get_session(&self, id: SessionId) -> Result<Option<DailyTaskSession>>;
    async fn put_session(&self, session: DailyTaskSession) -> Result<()>;
    async fn active_session(
        &self,
        owner: AccountId,
        day: NaiveDate,
    ) -> Result<Option<DailyTaskSession>>;

    async fn insert_task(&self, task: TaskRecord) -> Result<()>;
    async fn task_exists(&self, owner: AccountId, product: ProductId, day: NaiveDate)
        -> Result<bool>;
    async fn tasks_for_session(&self, session: SessionId) -> Result<Vec<TaskRecord>>;
    async fn tasks_on_day(&self, owner: AccountId, day: NaiveDate) -> Result<Vec<TaskRecord>>;

    async fn insert_rating(&self, rating: RatingRecord) -> Result<()>;
    async fn rating_exists(
        &self,
        owner: AccountId,
        product: ProductId,
        day: NaiveDate,
    ) -> Result<bool>;

    async fn record_transaction(&self, tx: LedgerTransaction) -> Result<()>;
    async fn transaction_history(&self, account: AccountId) -> Result<Vec<LedgerTransaction>>;

    async fn put_deposit(&self, request: DepositRequest) -> Result<()>;
    async fn get_deposit(&self, id: &str) -> Result<Option<DepositRequest>>;
    async fn put_withdrawal(&self, request: WithdrawalRequest) -> Result<()>;
    async fn get_withdrawal(&self, id: &str) -> Result<Option<WithdrawalRequest>>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;
}

pub struct MemoryStore {
    accounts: Arc<RwLock<AccountMap>>,
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    sessions: Arc<RwLock<SessionMap>>,
    tasks: Arc<RwLock<Vec<TaskRecord>>>,
    ratings: Arc<RwLock<Vec<RatingRecord>>>,
    transactions: Arc<RwLock<Vec<LedgerTransaction>>>,
    deposits: Arc<RwLock<HashMap<String, DepositRequest>>>,
    withdrawals: Arc<RwLock<HashMap<String, WithdrawalRequest>>>,
    backup: Arc<RwLock<StoreBackup>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            products: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tasks: Arc::new(RwLock::new(Vec::new())),
            ratings: Arc::new(RwLock::new(Vec::new())),
            transactions: Arc::new(RwLock::new(Vec::new())),
            deposits: Arc::new(RwLock::new(HashMap::new())),
            withdrawals: Arc::new(RwLock::new(HashMap::new())),
            backup: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).cloned())
    }

    async fn put_account(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let products = self.products.read().await;
        Ok(products.get(&id).cloned())
    }

    async fn put_product(&self, product: Product) -> Result<()> {
        let mut products = self.products.write().await;
        products.insert(product.id, product);
        Ok(())
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        let products = self.products.read().await;
        let mut active: Vec<Product> = products.values().filter(|p| p.is_active).cloned().collect();
        active.sort_by_key(|p| p.created_order);
        Ok(active)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<DailyTaskSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn put_session(&self, session: DailyTaskSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn active_session(
        &self,
        owner: AccountId,
        day: NaiveDate,
    ) -> Result<Option<DailyTaskSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|s| {
                s.owner == owner && s.session_date == day && s.status == SessionStatus::Active
            })
            .cloned())
    }

    async fn insert_task(&self, task: TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        tasks.push(task);
        Ok(())
    }

    async fn task_exists(
        &self,
        owner: AccountId,
        product: ProductId,
        day: NaiveDate,
    ) -> Result<bool> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .iter()
            .any(|t| t.owner == owner && t.product == product && t.day == day))
    }

    async fn tasks_for_session(&self, session: SessionId) -> Result<Vec<TaskRecord>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .iter()
            .filter(|t| t.session == Some(session))
            .cloned()
            .collect())
    }

    async fn tasks_on_day(&self, owner: AccountId, day: NaiveDate) -> Result<Vec<TaskRecord>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .iter()
            .filter(|t| t.owner == owner && t.day == day)
            .cloned()
            .collect())
    }

    async fn insert_rating(&self, rating: RatingRecord) -> Result<()> {
        let mut ratings = self.ratings.write().await;
        ratings.push(rating);
        Ok(())
    }

    async fn rating_exists(
        &self,
        owner: AccountId,
        product: ProductId,
        day: NaiveDate,
    ) -> Result<bool> {
        let ratings = self.ratings.read().await;
        Ok(ratings
            .iter()
            .any(|r| r.owner == owner && r.product == product && r.day == day))
    }

    async fn record_transaction(&self, tx: LedgerTransaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        info!(
            from = %tx.from,
            to = %tx.to,
            amount = tx.amount.to_usd(),
            tx_hash = %tx.tx_hash,
            tx_type = ?tx.tx_type,
            "📦 Transaction recorded"
        );
        transactions.push(tx);
        Ok(())
    }

    async fn transaction_history(&self, account: AccountId) -> Result<Vec<LedgerTransaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .iter()
            .filter(|tx| tx.from == account || tx.to == account)
            .cloned()
            .collect())
    }

    async fn put_deposit(&self, request: DepositRequest) -> Result<()> {
        let mut deposits = self.deposits.write().await;
        deposits.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_deposit(&self, id: &str) -> Result<Option<DepositRequest>> {
        let deposits = self.deposits.read().await;
        Ok(deposits.get(id).cloned())
    }

    async fn put_withdrawal(&self, request: WithdrawalRequest) -> Result<()> {
        let mut withdrawals = self.withdrawals.write().await;
        withdrawals.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Option<WithdrawalRequest>> {
        let withdrawals = self.withdrawals.read().await;
        Ok(withdrawals.get(id).cloned())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let accounts = self.accounts.read().await;
        let sessions = self.sessions.read().await;
        let tasks = self.tasks.read().await;
        let ratings = self.ratings.read().await;
        let transactions = self.transactions.read().await;

        let mut backup = self.backup.write().await;
        *backup = Some((
            accounts.clone(),
            sessions.clone(),
            tasks.clone(),
            ratings.clone(),
            transactions.clone(),
        ));
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        *backup = None;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;

        if let Some((accounts, sessions, tasks, ratings, transactions)) = backup.take() {
            *self.accounts.write().await = accounts;
            *self.sessions.write().await = sessions;
            *self.tasks.write().await = tasks;
            *self.ratings.write().await = ratings;
            *self.transactions.write().await = transactions;
            info!("❌ Store transaction rolled back (snapshot restored)");
        }

        Ok(())
    }
}
