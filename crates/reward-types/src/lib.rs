pub mod amount;
pub mod error;
pub mod ids;

pub use amount::{SignedUsd, UsdAmount, USD_BASE_UNIT, USD_DECIMALS};
pub use error::{EngineError, Result};
pub use ids::{AccountId, ProductId, SessionId};
