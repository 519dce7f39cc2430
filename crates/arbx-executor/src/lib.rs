//! Two-leg order execution for ARBX.
//!
//! Places a paired buy/sell across two venues that share no transactional
//! boundary, tracks fills over push and pull, and unwinds a leg whose sibling
//! failed so no position is left unhedged.
//!
//! # Key Components
//!
//! - [`ExecutionEngine`]: facade; gate checks, rate-limit leases, strategy, result
//! - [`OrderStrategyExecutor`]: limit+market, market+market and limit+limit shapes
//! - [`FillTracker`]: one awaitable per order over push updates and polling
//! - [`OrderPlacer`]: submission with cooldown and backoff retries
//! - [`RateLimiterRegistry`]: per-venue concurrency, pacing and cooldown
//! - [`OrderSequencer`]: per-venue ordering lock for nonce-sequenced venues
//! - [`ReduceOnlyGuard`]: quarantine of pairs a venue restricted to closing
//! - [`CompensationHandler`]: unwind of the surplus leg
//! - [`HaltLatch`]: stops openings after a failed unwind
//! - [`ProbeService`]: scheduled recovery probes for quarantined pairs
//! - [`PaperVenue`]: scripted in-memory venue
//!
//! # Execution Flow (in `ExecutionEngine::execute`)
//!
//! 1. Gate checks (venue, observation mode, halt, reduce-only)
//! 2. Inter-round pacing unless segmented
//! 3. Reserve both venues' rate limiters
//! 4. Run the planned shape; each leg waits on the fill tracker
//! 5. Unequal fills -> corrective orders, then unwind of the surplus
//! 6. Release leases, record metrics, emit `TradeCompleted`

pub mod compensation;
pub mod config;
pub mod engine;
pub mod error;
pub mod fill_tracker;
pub mod halt;
pub mod paper;
pub mod placement;
pub mod probe;
pub mod rate_limiter;
pub mod reduce_only;
pub mod retry;
pub mod sequencer;
pub mod strategy;
pub mod venue;

// Engine
pub use engine::ExecutionEngine;
pub use strategy::{limit_price, ExecutionPlan, OrderStrategyExecutor};

// Configuration
pub use config::{
    CompensationConfig, EngineConfig, LimitLimitConfig, OperatingMode, OrderModeConfig,
    ProbeConfig, RateLimitConfig, RetryConfig, VenueConfig, DEFAULT_VENUE_KEY,
};

// Error types
pub use error::{ExecutorError, ExecutorResult, VenueError, VenueResult};

// Venue contract
pub use paper::{FillPlan, PaperVenue};
pub use venue::{BoxFuture, DynVenue, NewOrder, OrderUpdateCallback, VenueAdapter, VenueRegistry};

// Components
pub use compensation::{CompensationHandler, UnwindReport};
pub use fill_tracker::{FillOutcome, FillTracker, HISTORY_SCAN_LIMIT};
pub use halt::{EventSink, ExecutionEvent, HaltLatch};
pub use placement::OrderPlacer;
pub use probe::{next_fire_delay, ProbeService};
pub use rate_limiter::{MultiLease, RateLimitLease, RateLimiterRegistry, VenueRateLimiter};
pub use reduce_only::{ProbeTarget, ReduceOnlyGuard, ReduceOnlyPairState};
pub use retry::{RetryDecision, RetryPolicy};
pub use sequencer::OrderSequencer;
