//! Error taxonomy returned to callers of the order engine
use crate::record::{OrderStatus, Role};

/// Every failure mode a transition request can surface. All of these are
/// returned synchronously; the engine never retries internally. The caller
/// decides whether to refetch-and-retry (`StaleVersion`) or surface the
/// error to the human actor.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("no transition from {from:?} to {to:?} for role {role:?}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
        role: Role,
    },
    #[error("actor {actor_id} does not hold the {role:?} role on this order")]
    Unauthorized { role: Role, actor_id: String },
    #[error("stale version: caller expected {expected}, stored record is at {actual}")]
    StaleVersion { expected: u64, actual: u64 },
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("total price overflows: {quantity} x {unit_price}")]
    PriceOverflow { quantity: u64, unit_price: u64 },
    #[error("unknown order: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Store(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl EngineError {
    // minicbor's encode/decode errors are generic over the writer, so they
    // are flattened to strings at the persistence boundary.
    pub fn codec<E: std::fmt::Display>(err: E) -> Self {
        Self::Codec(err.to_string())
    }
}
