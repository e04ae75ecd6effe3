use reward_types::UsdAmount;
use serde::{Deserialize, Serialize};

/// Platform constants for the settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tasks per daily session. Clamped to 1..=100 at session start.
    pub session_tasks: u32,
    /// Micro-commission rate applied to a lucky-order top-up.
    pub commission_rate: f64,
    /// Fixed reward credited to the parent when a child session completes.
    pub parent_reward: UsdAmount,
    /// Completed tasks required today before a lucky-order quote is offered.
    pub lucky_order_min_tasks: u32,
    /// Flat fee charged on withdrawal approval.
    pub withdrawal_fee: UsdAmount,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_tasks: 10,
            commission_rate: 0.0005, // 0.05%
            parent_reward: UsdAmount::from_usd(20.0),
            lucky_order_min_tasks: 3,
            withdrawal_fee: UsdAmount::from_usd(2.0),
        }
    }
}

impl EngineConfig {
    pub fn clamped_session_tasks(&self) -> u32 {
        self.session_tasks.clamp(1, 100)
    }
}
