//! Core domain types for the ARBX cross-venue execution engine.
//!
//! This crate provides the vocabulary shared by the engine and its callers:
//! - `Price`, `Size`: precision-safe numeric types
//! - `VenueId`, `InstrumentId`, `LegKey`, `PairId`: location identifiers
//! - `OrderIdentity`: venue and/or client order id, matched on either
//! - `OrderSnapshot`, `OrderHandle`: reported and tracked order state
//! - `TradeRequest`: the validated input of one paired execution
//! - `ExecutionResult`: the structured output, including compensations

pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod order;
pub mod request;
pub mod time;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{InstrumentId, LegKey, PairId, VenueId};
pub use order::{
    ClientOrderId, OrderIdentity, OrderKey, OrderSide, OrderStatus, OrderType, VenueOrderId,
};
pub use request::{TradeIntent, TradeLeg, TradeRequest};
pub use time::now_ms;

// Execution types
pub use execution::{
    CompensationAction, CompensationStatus, ExecutionMode, ExecutionOutcome, ExecutionResult,
    FailureKind, OrderHandle, OrderSnapshot, PartialFailure,
};
