use crate::clock::DayClock;
use crate::config::EngineConfig;
use crate::storage::RewardStore;
use crate::types::{DailyTaskSession, SessionStatus, TaskRecord};
use reward_types::{AccountId, EngineError, Result, SessionId, UsdAmount};
use std::sync::Arc;
use tracing::info;

/// Daily Session State Machine: `no-session → active → {completed, partial}`.
/// Exactly one active session per (account, day).
pub struct SessionManager {
    store: Arc<dyn RewardStore>,
    clock: Arc<dyn DayClock>,
    config: EngineConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn RewardStore>, clock: Arc<dyn DayClock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub async fn start(
        &self,
        account_id: AccountId,
        parent_account: Option<AccountId>,
    ) -> Result<DailyTaskSession> {
        let mut account = self
            .store
            .get_account(account_id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownAccount)?;

        if let Some(parent_id) = parent_account {
            if self
                .store
                .get_account(parent_id)
                .await
                .map_err(EngineError::Internal)?
                .is_none()
            {
                return Err(EngineError::Validation(
                    "Parent account not found".to_string(),
                ));
            }
        }

        // One time sample; session_date and started_at share the boundary.
        let now = self.clock.now();
        let today = now.date_naive();
        account.reset_for_day(today);

        if account.daily_session_active
            || self
                .store
                .active_session(account_id, today)
                .await
                .map_err(EngineError::Internal)?
                .is_some()
        {
            return Err(EngineError::SessionUnavailable(
                "Daily session already active".to_string(),
            ));
        }

        let session = DailyTaskSession {
            id: new_session_id(account_id, now),
            owner: account_id,
            parent_account,
            session_date: today,
            status: SessionStatus::Active,
            tasks_completed: 0,
            total_tasks: self.config.clamped_session_tasks(),
            reward_earned: UsdAmount::ZERO,
            reward_distributed: UsdAmount::ZERO,
            child_reward_sent: UsdAmount::ZERO,
            is_first_session: account.daily_sessions_completed == 0,
            lucky_order_triggered: false,
            lucky_order_commission: UsdAmount::ZERO,
            started_at: now,
            completed_at: None,
        };
        self.store
            .put_session(session.clone())
            .await
            .map_err(EngineError::Internal)?;

        account.daily_session_active = true;
        self.store
            .put_account(account)
            .await
            .map_err(EngineError::Internal)?;

        info!(
            account = %account_id,
            session = %session.id,
            total_tasks = session.total_tasks,
            first_session = session.is_first_session,
            "🟢 Daily session started"
        );
        Ok(session)
    }

    /// Active session for (account, today); the settlement entry point for
    /// session mode.
    pub async fn require_active(&self, account_id: AccountId) -> Result<DailyTaskSession> {
        let today = self.clock.today();
        let session = self
            .store
            .active_session(account_id, today)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| {
                EngineError::SessionUnavailable("No active daily session".to_string())
            })?;
        if session.is_full() {
            return Err(EngineError::SessionUnavailable(
                "Session already completed".to_string(),
            ));
        }
        Ok(session)
    }

    /// The `active → active` self-loop, and the `active → completed`
    /// transition when the last task lands. Returns the updated session and
    /// whether it completed on this call.
    pub async fn record_task(
        &self,
        session_id: SessionId,
        task: &TaskRecord,
    ) -> Result<(DailyTaskSession, bool)> {
        let mut session = self
            .store
            .get_session(session_id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| EngineError::SessionUnavailable("Session not found".to_string()))?;

        if session.status != SessionStatus::Active {
            return Err(EngineError::SessionUnavailable(
                "Session is not active".to_string(),
            ));
        }
        if session.is_full() {
            return Err(EngineError::SessionUnavailable(
                "Session already completed".to_string(),
            ));
        }

        session.tasks_completed += 1;
        session.reward_earned = session.reward_earned.saturating_add(task.reward);
        if task.is_lucky_order {
            session.lucky_order_triggered = true;
            session.lucky_order_commission =
                session.lucky_order_commission.saturating_add(task.commission);
        }

        let completed = session.is_full();
        if completed {
            session.status = SessionStatus::Completed;
            session.completed_at = Some(self.clock.now());

            let mut account = self
                .store
                .get_account(session.owner)
                .await
                .map_err(EngineError::Internal)?
                .ok_or(EngineError::UnknownAccount)?;
            account.daily_session_active = false;
            account.daily_sessions_completed += 1;
            self.store
                .put_account(account)
                .await
                .map_err(EngineError::Internal)?;

            info!(
                session = %session.id,
                account = %session.owner,
                reward_earned = session.reward_earned.to_usd(),
                lucky = session.lucky_order_triggered,
                "🏁 Daily session completed"
            );
        }

        self.store
            .put_session(session.clone())
            .await
            .map_err(EngineError::Internal)?;
        Ok((session, completed))
    }

    /// Administrative closure of a session that never completed
    /// (end-of-day sweep). No money moves.
    pub async fn close_partial(&self, session_id: SessionId) -> Result<DailyTaskSession> {
        let mut session = self
            .store
            .get_session(session_id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| EngineError::SessionUnavailable("Session not found".to_string()))?;

        if session.status != SessionStatus::Active {
            return Err(EngineError::SessionUnavailable(
                "Only active sessions can be closed as partial".to_string(),
            ));
        }

        session.status = SessionStatus::Partial;
        session.completed_at = Some(self.clock.now());
        self.store
            .put_session(session.clone())
            .await
            .map_err(EngineError::Internal)?;

        if let Some(mut account) = self
            .store
            .get_account(session.owner)
            .await
            .map_err(EngineError::Internal)?
        {
            account.daily_session_active = false;
            self.store
                .put_account(account)
                .await
                .map_err(EngineError::Internal)?;
        }

        info!(
            session = %session.id,
            tasks_completed = session.tasks_completed,
            total_tasks = session.total_tasks,
            "🟡 Session closed as partial"
        );
        Ok(session)
    }
}

fn new_session_id(owner: AccountId, now: chrono::DateTime<chrono::Utc>) -> SessionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner.as_bytes());
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    SessionId::from_bytes(bytes)
}
