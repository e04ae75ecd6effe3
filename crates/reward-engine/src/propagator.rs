use crate::config::EngineConfig;
use crate::ledger::{LedgerManager, TxMeta};
use crate::storage::RewardStore;
use crate::types::{DailyTaskSession, LedgerTransaction, TransactionType, UserType};
use reward_types::{EngineError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Parent-Child Reward Propagator. Runs after a session's completion is
/// durable; a failure here never rolls the completion back.
pub struct RewardPropagator {
    store: Arc<dyn RewardStore>,
    ledger: Arc<LedgerManager>,
    config: EngineConfig,
}

impl RewardPropagator {
    pub fn new(
        store: Arc<dyn RewardStore>,
        ledger: Arc<LedgerManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    pub async fn on_session_complete(
        &self,
        session: &DailyTaskSession,
    ) -> Result<Vec<LedgerTransaction>> {
        let owner = self
            .store
            .get_account(session.owner)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| {
                EngineError::PropagationFailure("Session owner account missing".to_string())
            })?;

        let mut session = session.clone();
        let mut applied = Vec::new();

        let parent_target = session.parent_account.or(match owner.user_type {
            UserType::Child => owner.parent_account,
            _ => None,
        });

        if let Some(parent_id) = parent_target {
            // Cross-account credit; serialize against the parent's writers.
            let _guard = self.ledger.lock_account(parent_id).await;

            if self
                .store
                .get_account(parent_id)
                .await
                .map_err(EngineError::Internal)?
                .is_none()
            {
                return Err(EngineError::PropagationFailure(format!(
                    "Parent account {} missing",
                    parent_id
                )));
            }

            let (_, tx) = self
                .ledger
                .credit(
                    parent_id,
                    self.config.parent_reward,
                    TxMeta::new(
                        TransactionType::ParentChildReward,
                        "Daily task completion reward",
                    )
                    .from_account(session.owner)
                    .with_session(session.id),
                )
                .await
                .map_err(|e| EngineError::PropagationFailure(e.to_string()))?;

            session.child_reward_sent = self.config.parent_reward;
            session.reward_distributed = session
                .reward_distributed
                .saturating_add(self.config.parent_reward);
            applied.push(tx);

            info!(
                session = %session.id,
                child = %session.owner,
                parent = %parent_id,
                amount = self.config.parent_reward.to_usd(),
                "👪 Parent reward propagated"
            );
        } else {
            // Root session: nothing flows upward. The first session of the
            // day fans a fixed bonus out to each linked child.
            session.reward_distributed = session.reward_earned;

            if session.is_first_session {
                for child_id in &owner.children {
                    let _guard = self.ledger.lock_account(*child_id).await;
                    if self
                        .store
                        .get_account(*child_id)
                        .await
                        .map_err(EngineError::Internal)?
                        .is_none()
                    {
                        warn!(child = %child_id, "⚠️ Linked child account missing, bonus skipped");
                        continue;
                    }
                    let (_, tx) = self
                        .ledger
                        .credit(
                            *child_id,
                            self.config.parent_reward,
                            TxMeta::new(
                                TransactionType::ParentChildReward,
                                "First session reward from parent",
                            )
                            .from_account(owner.id)
                            .with_session(session.id),
                        )
                        .await
                        .map_err(|e| EngineError::PropagationFailure(e.to_string()))?;
                    applied.push(tx);
                }
            }
        }

        self.store
            .put_session(session)
            .await
            .map_err(EngineError::Internal)?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{DayClock, ManualClock};
    use crate::storage::MemoryStore;
    use crate::types::{Account, SessionStatus};
    use chrono::{TimeZone, Utc};
    use reward_types::{AccountId, SessionId, UsdAmount};

    fn completed_session(owner: AccountId, parent: Option<AccountId>) -> DailyTaskSession {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        DailyTaskSession {
            id: SessionId::from_bytes([7; 16]),
            owner,
            parent_account: parent,
            session_date: now.date_naive(),
            status: SessionStatus::Completed,
            tasks_completed: 10,
            total_tasks: 10,
            reward_earned: UsdAmount::from_usd(360.0),
            reward_distributed: UsdAmount::ZERO,
            child_reward_sent: UsdAmount::ZERO,
            is_first_session: true,
            lucky_order_triggered: false,
            lucky_order_commission: UsdAmount::ZERO,
            started_at: now,
            completed_at: Some(now),
        }
    }

    async fn fixture() -> (Arc<MemoryStore>, RewardPropagator) {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn DayClock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(LedgerManager::new(store.clone(), clock));
        let propagator = RewardPropagator::new(store.clone(), ledger, EngineConfig::default());
        (store, propagator)
    }

    #[tokio::test]
    async fn test_child_session_credits_parent() {
        let (store, propagator) = fixture().await;
        let parent = AccountId::from_bytes([1; 16]);
        let child = AccountId::from_bytes([2; 16]);
        store
            .put_account(Account::new(parent, "parent", UserType::Parent))
            .await
            .unwrap();
        store
            .put_account(Account::new(child, "child", UserType::Child).with_parent(parent))
            .await
            .unwrap();

        let session = completed_session(child, Some(parent));
        store.put_session(session.clone()).await.unwrap();

        let txs = propagator.on_session_complete(&session).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].from, child);
        assert_eq!(txs[0].to, parent);
        assert_eq!(txs[0].tx_type, TransactionType::ParentChildReward);
        assert_eq!(txs[0].session, Some(session.id));

        let parent_acct = store.get_account(parent).await.unwrap().unwrap();
        assert_eq!(parent_acct.balance, UsdAmount::from_usd(20.0));
        // Child balance untouched; the reward is platform-funded.
        let child_acct = store.get_account(child).await.unwrap().unwrap();
        assert_eq!(child_acct.balance, UsdAmount::ZERO);

        let updated = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(updated.child_reward_sent, UsdAmount::from_usd(20.0));
    }

    #[tokio::test]
    async fn test_missing_parent_is_reported_not_fatal() {
        let (store, propagator) = fixture().await;
        let child = AccountId::from_bytes([2; 16]);
        let ghost = AccountId::from_bytes([9; 16]);
        store
            .put_account(Account::new(child, "child", UserType::Child).with_parent(ghost))
            .await
            .unwrap();

        let session = completed_session(child, Some(ghost));
        store.put_session(session.clone()).await.unwrap();

        assert!(matches!(
            propagator.on_session_complete(&session).await,
            Err(EngineError::PropagationFailure(_))
        ));
        // The completed session itself is untouched.
        let unchanged = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_first_parent_session_fans_out_to_children() {
        let (store, propagator) = fixture().await;
        let parent = AccountId::from_bytes([1; 16]);
        let c1 = AccountId::from_bytes([2; 16]);
        let c2 = AccountId::from_bytes([3; 16]);

        let mut parent_acct = Account::new(parent, "parent", UserType::Parent);
        parent_acct.children = vec![c1, c2];
        store.put_account(parent_acct).await.unwrap();
        for (id, name) in [(c1, "c1"), (c2, "c2")] {
            store
                .put_account(Account::new(id, name, UserType::Child).with_parent(parent))
                .await
                .unwrap();
        }

        let session = completed_session(parent, None);
        store.put_session(session.clone()).await.unwrap();

        let txs = propagator.on_session_complete(&session).await.unwrap();
        assert_eq!(txs.len(), 2);
        for child in [c1, c2] {
            let acct = store.get_account(child).await.unwrap().unwrap();
            assert_eq!(acct.balance, UsdAmount::from_usd(20.0));
        }

        let updated = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(updated.reward_distributed, UsdAmount::from_usd(360.0));
    }
}
