pub mod catalog;
pub mod clock;
pub mod config;
pub mod funding;
pub mod gate;
pub mod ledger;
pub mod lucky;
pub mod propagator;
pub mod session;
pub mod settlement;
pub mod storage;
pub mod types;

pub use catalog::ProductCatalog;
pub use clock::{DayClock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use funding::FundingDesk;
pub use gate::{GateDecision, SequentialGate};
pub use ledger::{LedgerManager, TxMeta};
pub use lucky::{LuckyOrderDesk, LuckyOrderQuote};
pub use propagator::RewardPropagator;
pub use session::SessionManager;
pub use settlement::{SettleRequest, SettlementOutcome, TaskSettlement};
pub use storage::{MemoryStore, RewardStore};

use reward_types::{AccountId, EngineError, ProductId, Result, SessionId, SignedUsd, UsdAmount};
use std::sync::Arc;
use tracing::warn;
use types::DailyTaskSession;

#[derive(Debug, Clone)]
pub struct GateCheck {
    pub allowed: bool,
    pub blocking_product: Option<String>,
    pub already_completed: bool,
}

#[derive(Debug, Clone)]
pub struct TaskSettled {
    pub profit: SignedUsd,
    pub new_balance: UsdAmount,
    pub session: Option<DailyTaskSession>,
}

/// Outcome of `settle_task`: either the task settled, or it failed on
/// insufficient balance with a lucky-order quote the caller may confirm.
#[derive(Debug, Clone)]
pub enum SettleTaskResult {
    Settled(TaskSettled),
    NeedsTopUp(LuckyOrderQuote),
}

/// The settlement engine facade. Wires the components over one store and one
/// clock, and exposes the operations route handlers call.
pub struct RewardEngine {
    store: Arc<dyn RewardStore>,
    clock: Arc<dyn DayClock>,
    pub ledger: Arc<LedgerManager>,
    pub catalog: Arc<ProductCatalog>,
    pub gate: Arc<SequentialGate>,
    pub sessions: Arc<SessionManager>,
    pub settlement: Arc<TaskSettlement>,
    pub lucky: Arc<LuckyOrderDesk>,
    pub propagator: Arc<RewardPropagator>,
    pub funding: Arc<FundingDesk>,
}

impl RewardEngine {
    pub fn new(store: Arc<dyn RewardStore>, config: EngineConfig, clock: Arc<dyn DayClock>) -> Self {
        let ledger = Arc::new(LedgerManager::new(store.clone(), clock.clone()));
        let catalog = Arc::new(ProductCatalog::new(store.clone()));
        let gate = Arc::new(SequentialGate::new(store.clone(), catalog.clone()));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let settlement = Arc::new(TaskSettlement::new(
            store.clone(),
            ledger.clone(),
            gate.clone(),
        ));
        let lucky = Arc::new(LuckyOrderDesk::new(
            store.clone(),
            ledger.clone(),
            config.clone(),
        ));
        let propagator = Arc::new(RewardPropagator::new(
            store.clone(),
            ledger.clone(),
            config.clone(),
        ));
        let funding = Arc::new(FundingDesk::new(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            config,
        ));

        Self {
            store,
            clock,
            ledger,
            catalog,
            gate,
            sessions,
            settlement,
            lucky,
            propagator,
            funding,
        }
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config, Arc::new(SystemClock))
    }

    pub async fn start_session(
        &self,
        account: AccountId,
        parent_account: Option<AccountId>,
    ) -> Result<DailyTaskSession> {
        let _guard = self.ledger.lock_account(account).await;
        self.sessions.start(account, parent_account).await
    }

    pub async fn check_gate(&self, account: AccountId, product: ProductId) -> Result<GateCheck> {
        self.store
            .get_account(account)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownAccount)?;
        let product_info = self
            .store
            .get_product(product)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownProduct)?;
        if !product_info.is_active {
            return Err(EngineError::Validation(format!(
                "Product \"{}\" is not active",
                product_info.name
            )));
        }

        let decision = self
            .gate
            .can_settle(account, product, self.clock.today())
            .await
            .map_err(EngineError::Internal)?;

        Ok(match decision {
            GateDecision::Allowed => GateCheck {
                allowed: true,
                blocking_product: None,
                already_completed: false,
            },
            GateDecision::AlreadyCompleted => GateCheck {
                allowed: false,
                blocking_product: None,
                already_completed: true,
            },
            GateDecision::Blocked(blocking) => GateCheck {
                allowed: false,
                blocking_product: Some(blocking.name),
                already_completed: false,
            },
        })
    }

    /// Settle one task, in session mode when `session` is given. An eligible
    /// insufficient-balance failure surfaces a lucky-order quote instead of
    /// an error.
    pub async fn settle_task(
        &self,
        account: AccountId,
        product: ProductId,
        rating: u8,
        session: Option<SessionId>,
    ) -> Result<SettleTaskResult> {
        let guard = self.ledger.lock_account(account).await;

        // One time sample for the whole operation; every day-boundary check
        // inside it sees the same calendar day.
        let now = self.clock.now();
        let today = now.date_naive();

        let session_state = match session {
            Some(id) => Some(self.session_for_settlement(account, id, today).await?),
            None => None,
        };

        let request = SettleRequest {
            account,
            product,
            rating,
            lucky_commission: None,
        };
        match self
            .settlement
            .settle(&request, session_state.as_ref(), now)
            .await
        {
            Ok(outcome) => self.finish_settlement(outcome, session_state, guard).await,
            Err(EngineError::InsufficientBalance { shortfall }) => {
                if self
                    .lucky
                    .eligible(account, today)
                    .await
                    .map_err(EngineError::Internal)?
                {
                    Ok(SettleTaskResult::NeedsTopUp(
                        self.lucky.quote(product, shortfall),
                    ))
                } else {
                    Err(EngineError::InsufficientBalance { shortfall })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Confirm a quoted lucky order: credit the top-up and commission, then
    /// retry the settlement exactly once. A second failure is final.
    pub async fn confirm_lucky_order(
        &self,
        account: AccountId,
        product: ProductId,
        session: Option<SessionId>,
    ) -> Result<SettleTaskResult> {
        let guard = self.ledger.lock_account(account).await;

        let now = self.clock.now();
        let today = now.date_naive();

        let session_state = match session {
            Some(id) => Some(self.session_for_settlement(account, id, today).await?),
            None => None,
        };

        let balance = self
            .store
            .get_account(account)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownAccount)?
            .balance;
        let price = self
            .store
            .get_product(product)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownProduct)?
            .price;

        let shortfall = price.saturating_sub(balance);
        let lucky_commission = if shortfall.is_zero() {
            // Balance recovered some other way; settle without the top-up.
            None
        } else {
            // A confirm that was never quoted gets the same refusal the
            // quote path would have given.
            if !self
                .lucky
                .eligible(account, today)
                .await
                .map_err(EngineError::Internal)?
            {
                return Err(EngineError::InsufficientBalance { shortfall });
            }
            let quote = self.lucky.quote(product, shortfall);
            self.lucky
                .apply_top_up(account, &quote)
                .await
                .map_err(EngineError::Internal)?;
            Some(quote.commission)
        };

        let request = SettleRequest {
            account,
            product,
            rating: settlement::REQUIRED_RATING,
            lucky_commission,
        };
        let outcome = self
            .settlement
            .settle(&request, session_state.as_ref(), now)
            .await?;
        self.finish_settlement(outcome, session_state, guard).await
    }

    /// Administrative closure of a session that never completed. Runs under
    /// the owner's account lock so it cannot interleave with an in-flight
    /// settlement for the same account.
    pub async fn close_partial_session(&self, session: SessionId) -> Result<DailyTaskSession> {
        let owner = self
            .store
            .get_session(session)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| EngineError::SessionUnavailable("Session not found".to_string()))?
            .owner;
        let _guard = self.ledger.lock_account(owner).await;
        self.sessions.close_partial(session).await
    }

    /// Link `child` under `parent`, moving `initial_balance` from the parent
    /// to seed the child. Both links and the transfer land or none do.
    pub async fn link_child(
        &self,
        parent: AccountId,
        child: AccountId,
        initial_balance: UsdAmount,
    ) -> Result<()> {
        if parent == child {
            return Err(EngineError::Validation(
                "Cannot link an account to itself".to_string(),
            ));
        }
        let _parent_guard = self.ledger.lock_account(parent).await;
        let _child_guard = self.ledger.lock_account(child).await;

        let mut parent_acct = self
            .store
            .get_account(parent)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownAccount)?;
        let child_acct = self
            .store
            .get_account(child)
            .await
            .map_err(EngineError::Internal)?
            .ok_or(EngineError::UnknownAccount)?;
        if child_acct.parent_account.is_some() {
            return Err(EngineError::Validation(
                "Account is already linked to a parent".to_string(),
            ));
        }

        self.store
            .begin_transaction()
            .await
            .map_err(EngineError::Internal)?;
        let linked = child_acct.with_parent(parent);
        if !parent_acct.children.contains(&child) {
            parent_acct.children.push(child);
        }
        let result = async {
            self.store.put_account(parent_acct).await?;
            self.store.put_account(linked).await?;
            if !initial_balance.is_zero() {
                self.ledger
                    .transfer(
                        parent,
                        child,
                        initial_balance,
                        TxMeta::new(
                            types::TransactionType::BalanceTransfer,
                            "Initial balance for linked child",
                        ),
                    )
                    .await?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.store
                    .commit_transaction()
                    .await
                    .map_err(EngineError::Internal)?;
                Ok(())
            }
            Err(e) => {
                let _ = self.store.rollback_transaction().await;
                Err(EngineError::Internal(e))
            }
        }
    }

    async fn finish_settlement(
        &self,
        outcome: SettlementOutcome,
        session_state: Option<DailyTaskSession>,
        guard: tokio::sync::OwnedMutexGuard<()>,
    ) -> Result<SettleTaskResult> {
        let mut completed = None;
        let mut session_after = None;

        if let Some(session) = &session_state {
            let (updated, completed_now) =
                self.sessions.record_task(session.id, &outcome.task).await?;
            if completed_now {
                completed = Some(updated.clone());
            }
            session_after = Some(updated);
        }

        // The owner's completion is durable before the cross-account credit;
        // propagation failures are follow-ups, never rollbacks.
        drop(guard);
        if let Some(session) = completed {
            match self.propagator.on_session_complete(&session).await {
                Ok(_) => {
                    session_after = self
                        .store
                        .get_session(session.id)
                        .await
                        .map_err(EngineError::Internal)?;
                }
                Err(e) => {
                    warn!(session = %session.id, error = %e, "⚠️ Reward propagation failed");
                }
            }
        }

        Ok(SettleTaskResult::Settled(TaskSettled {
            profit: outcome.profit,
            new_balance: outcome.new_balance,
            session: session_after,
        }))
    }

    async fn session_for_settlement(
        &self,
        account: AccountId,
        id: SessionId,
        today: chrono::NaiveDate,
    ) -> Result<DailyTaskSession> {
        let session = self
            .store
            .get_session(id)
            .await
            .map_err(EngineError::Internal)?
            .ok_or_else(|| EngineError::SessionUnavailable("Session not found".to_string()))?;

        if session.owner != account {
            return Err(EngineError::Validation(
                "Session does not belong to this account".to_string(),
            ));
        }
        if session.status != types::SessionStatus::Active {
            return Err(EngineError::SessionUnavailable(
                "Session is not active".to_string(),
            ));
        }
        if session.is_full() {
            return Err(EngineError::SessionUnavailable(
                "Session already completed".to_string(),
            ));
        }
        if session.session_date != today {
            return Err(EngineError::SessionUnavailable(
                "Session is not for today".to_string(),
            ));
        }
        Ok(session)
    }
}
