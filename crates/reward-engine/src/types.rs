use chrono::{DateTime, NaiveDate, Utc};
use reward_types::{AccountId, ProductId, SessionId, SignedUsd, UsdAmount};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Parent,
    Child,
    Regular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub balance: UsdAmount,
    pub user_type: UserType,
    pub parent_account: Option<AccountId>,
    pub children: Vec<AccountId>,
    pub daily_session_active: bool,
    pub last_daily_reset: Option<NaiveDate>,
    pub daily_sessions_completed: u32,
    pub total_earnings_today: UsdAmount,
    pub lucky_order_count: u32,
    pub commission_earned: UsdAmount,
}

impl Account {
    pub fn new(id: AccountId, username: impl Into<String>, user_type: UserType) -> Self {
        Self {
            id,
            username: username.into(),
            balance: UsdAmount::ZERO,
            user_type,
            parent_account: None,
            children: Vec::new(),
            daily_session_active: false,
            last_daily_reset: None,
            daily_sessions_completed: 0,
            total_earnings_today: UsdAmount::ZERO,
            lucky_order_count: 0,
            commission_earned: UsdAmount::ZERO,
        }
    }

    pub fn with_parent(mut self, parent: AccountId) -> Self {
        self.user_type = UserType::Child;
        self.parent_account = Some(parent);
        self
    }

    /// Rolls the per-day counters forward when a new calendar day is seen.
    /// Returns true if a rollover happened.
    pub fn reset_for_day(&mut self, today: NaiveDate) -> bool {
        if self.last_daily_reset == Some(today) {
            return false;
        }
        self.total_earnings_today = UsdAmount::ZERO;
        self.daily_session_active = false;
        self.last_daily_reset = Some(today);
        true
    }

    pub fn can_start_session(&self, today: NaiveDate) -> bool {
        self.last_daily_reset != Some(today) || !self.daily_session_active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: UsdAmount,
    pub reward: UsdAmount,
    /// Catalog insertion order; defines the daily rating sequence.
    pub created_order: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyTaskSession {
    pub id: SessionId,
    pub owner: AccountId,
    /// None means this is a root/parent session.
    pub parent_account: Option<AccountId>,
    pub session_date: NaiveDate,
    pub status: SessionStatus,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    pub reward_earned: UsdAmount,
    pub reward_distributed: UsdAmount,
    pub child_reward_sent: UsdAmount,
    pub is_first_session: bool,
    pub lucky_order_triggered: bool,
    pub lucky_order_commission: UsdAmount,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DailyTaskSession {
    pub fn is_full(&self) -> bool {
        self.tasks_completed >= self.total_tasks
    }

    pub fn remaining_tasks(&self) -> u32 {
        self.total_tasks.saturating_sub(self.tasks_completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    Pending,
    Failed,
}

/// One settled task. Immutable once written; the (owner, product, day)
/// triple is the uniqueness anchor the sequential gate relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub owner: AccountId,
    pub product: ProductId,
    /// None when the task was settled outside any session ("simple mode").
    pub session: Option<SessionId>,
    pub day: NaiveDate,
    pub reward: UsdAmount,
    pub product_price: UsdAmount,
    pub profit: SignedUsd,
    pub commission: UsdAmount,
    pub is_lucky_order: bool,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// Session-less rating mirror of a TaskRecord.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRecord {
    pub owner: AccountId,
    pub product: ProductId,
    pub day: NaiveDate,
    pub rating: u8,
    pub reward: UsdAmount,
    pub product_price: UsdAmount,
    pub profit: SignedUsd,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    ParentChildReward,
    ChildOwnTask,
    LuckyOrderCommission,
    Deposit,
    Withdrawal,
    BalanceTransfer,
}

/// Which side(s) of the transaction actually moved balance. `from`/`to` are
/// attribution; a `ParentChildReward` names the child as `from` but only
/// credits the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxDirection {
    CreditTo,
    DebitFrom,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub tx_hash: String,
    pub from: AccountId,
    pub to: AccountId,
    pub session: Option<SessionId>,
    pub product: Option<ProductId>,
    pub tx_type: TransactionType,
    pub direction: TxDirection,
    pub amount: UsdAmount,
    pub commission_rate: f64,
    pub commission_amount: UsdAmount,
    pub status: TxStatus,
    pub description: String,
    pub processed_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Signed effect of this transaction on `account`, in base units.
    pub fn signed_effect(&self, account: AccountId) -> i64 {
        let mut effect = 0i64;
        let credits_to = matches!(self.direction, TxDirection::CreditTo | TxDirection::Transfer);
        let debits_from = matches!(self.direction, TxDirection::DebitFrom | TxDirection::Transfer);
        if credits_to && self.to == account {
            effect += self.amount.to_base_units() as i64;
        }
        if debits_from && self.from == account {
            effect -= self.amount.to_base_units() as i64;
        }
        effect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingStatus {
    Pending,
    Approved,
    Rejected,
}

/// Externally-approved top-up request. The engine never approves money
/// movement on its own; approval is an administrative action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: String,
    pub account: AccountId,
    pub amount: UsdAmount,
    pub fee: UsdAmount,
    pub method: String,
    pub address: String,
    pub status: FundingStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: String,
    pub account: AccountId,
    pub amount: UsdAmount,
    pub fee: UsdAmount,
    pub method: String,
    pub address: String,
    pub status: FundingStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
