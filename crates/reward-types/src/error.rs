use crate::UsdAmount;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Account not found")]
    UnknownAccount,

    #[error("Product not found")]
    UnknownProduct,

    #[error("You must rate \"{blocking_product}\" before rating this product. Please complete products in order.")]
    Ordering { blocking_product: String },

    #[error("Insufficient balance: {shortfall} more required")]
    InsufficientBalance { shortfall: UsdAmount },

    #[error("You have already rated this product today")]
    DuplicateCompletion,

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Reward propagation failed: {0}")]
    PropagationFailure(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
