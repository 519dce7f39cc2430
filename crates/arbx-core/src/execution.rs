//! Order tracking and execution result types.
//!
//! This module provides:
//! - [`OrderSnapshot`]: venue-normalized order state with optional fields
//! - [`OrderHandle`]: the engine's view of one submitted order
//! - [`ExecutionResult`]: the structured outcome of one trade request
//! - [`CompensationAction`]: one unwind order recorded against a pair

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::{InstrumentId, PairId, VenueId};
use crate::order::{OrderIdentity, OrderSide, OrderStatus, OrderType};
use crate::time::now_ms;
use crate::{Price, Size};

// ============================================================================
// OrderSnapshot
// ============================================================================

/// Order state as reported by a venue, on submission, query, or push.
///
/// Venues disagree on which fields they report and when, so everything except
/// the identity is optional. Adapters normalize their payloads into this record;
/// the engine never probes raw venue objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub identity: OrderIdentity,
    #[serde(default)]
    pub instrument: Option<InstrumentId>,
    #[serde(default)]
    pub side: Option<OrderSide>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub requested: Option<Size>,
    /// Cumulative filled quantity.
    #[serde(default)]
    pub filled: Option<Size>,
    #[serde(default)]
    pub avg_price: Option<Price>,
    #[serde(default)]
    pub price: Option<Price>,
    /// Venue update time (Unix milliseconds).
    #[serde(default)]
    pub updated_at: Option<u64>,
}

impl OrderSnapshot {
    #[must_use]
    pub fn new(identity: OrderIdentity) -> Self {
        Self {
            identity,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_filled(mut self, filled: Size) -> Self {
        self.filled = Some(filled);
        self
    }

    #[must_use]
    pub fn with_requested(mut self, requested: Size) -> Self {
        self.requested = Some(requested);
        self
    }

    #[must_use]
    pub fn with_avg_price(mut self, price: Price) -> Self {
        self.avg_price = Some(price);
        self
    }

    #[must_use]
    pub fn with_instrument(mut self, instrument: InstrumentId) -> Self {
        self.instrument = Some(instrument);
        self
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }

    /// Filled quantity, treating an absent field as zero.
    #[must_use]
    pub fn filled_or_zero(&self) -> Size {
        self.filled.unwrap_or(Size::ZERO)
    }

    /// Merge a later report into this one.
    ///
    /// Known fields are never replaced by unknown ones, cumulative fill never
    /// decreases, and a terminal status is never replaced by a live one.
    pub fn absorb(&mut self, later: &OrderSnapshot) {
        self.identity.absorb(&later.identity);
        if later.instrument.is_some() {
            self.instrument.clone_from(&later.instrument);
        }
        if later.side.is_some() {
            self.side = later.side;
        }
        if let Some(status) = later.status {
            let keep_terminal = self.is_terminal() && !status.is_terminal();
            if !keep_terminal {
                self.status = Some(status);
            }
        }
        if later.requested.is_some() {
            self.requested = later.requested;
        }
        if let Some(filled) = later.filled {
            if self.filled.map_or(true, |current| filled > current) {
                self.filled = Some(filled);
            }
        }
        if later.avg_price.is_some() {
            self.avg_price = later.avg_price;
        }
        if later.price.is_some() {
            self.price = later.price;
        }
        if later.updated_at.is_some() {
            self.updated_at = later.updated_at;
        }
    }
}

// ============================================================================
// OrderHandle
// ============================================================================

/// The engine's record of one submitted order.
///
/// Created at submission and mutated only through [`OrderHandle::merge`] by
/// the fill tracker until the order is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub identity: OrderIdentity,
    pub venue: VenueId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub requested: Size,
    pub filled: Size,
    pub avg_price: Option<Price>,
    /// Limit price; `None` for market orders.
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub reduce_only: bool,
    /// Creation timestamp (Unix milliseconds).
    pub created_at: u64,
    /// Last update timestamp (Unix milliseconds).
    pub updated_at: u64,
}

impl OrderHandle {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: OrderIdentity,
        venue: VenueId,
        instrument: InstrumentId,
        side: OrderSide,
        order_type: OrderType,
        requested: Size,
        price: Option<Price>,
        reduce_only: bool,
    ) -> Self {
        let now = now_ms();
        Self {
            identity,
            venue,
            instrument,
            side,
            order_type,
            requested,
            filled: Size::ZERO,
            avg_price: None,
            price,
            status: OrderStatus::Open,
            reduce_only,
            created_at: now,
            updated_at: now,
        }
    }

    /// Requested minus filled, clamped at zero.
    #[must_use]
    pub fn remaining(&self) -> Size {
        self.requested.saturating_sub(self.filled)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn is_fully_filled(&self) -> bool {
        self.requested.is_positive() && self.filled >= self.requested
    }

    /// Monotonic merge of a venue report.
    ///
    /// Filled quantity only grows and is capped at the requested quantity.
    /// Returns true if any tracked field changed.
    pub fn merge(&mut self, snapshot: &OrderSnapshot) -> bool {
        let before = (self.filled, self.status, self.avg_price);
        self.identity.absorb(&snapshot.identity);

        if let Some(filled) = snapshot.filled {
            let capped = filled.clamp_non_negative().min(self.requested);
            if capped > self.filled {
                self.filled = capped;
            }
        }
        if snapshot.avg_price.is_some() {
            self.avg_price = snapshot.avg_price;
        }
        if self.price.is_none() && self.order_type == OrderType::Limit {
            self.price = snapshot.price;
        }
        if let Some(status) = snapshot.status {
            if !(self.status.is_terminal() && !status.is_terminal()) {
                self.status = status;
            }
        }
        if self.status == OrderStatus::Open && self.filled.is_positive() {
            self.status = OrderStatus::PartiallyFilled;
        }
        self.updated_at = snapshot.updated_at.unwrap_or_else(now_ms);

        before != (self.filled, self.status, self.avg_price)
    }
}

// ============================================================================
// Execution Result
// ============================================================================

/// Order shape used for a leg pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Leg A limit, leg B market once A fills.
    LimitMarket,
    /// Both legs market, concurrently.
    MarketMarket,
    /// Both legs limit, concurrently, with shortfall reconciliation.
    LimitLimit,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LimitMarket => "limit_market",
            Self::MarketMarket => "market_market",
            Self::LimitLimit => "limit_limit",
        };
        f.write_str(s)
    }
}

/// Top-level outcome of a trade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Both legs filled the same nonzero quantity without unwinds.
    Success,
    /// One leg filled more than its sibling; compensation was attempted.
    PartialFailure,
    /// Nothing was left open; nothing (or nothing confirmed) was filled.
    Failure,
    /// Observation mode: the request was logged, no orders were placed.
    Observed,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
            Self::Observed => "observed",
        };
        f.write_str(s)
    }
}

/// Error classification attached to non-successful results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or timeout errors exhausted the retry budget.
    Transient,
    /// Throttling responses exhausted the retry budget.
    RateLimited,
    /// A venue restricted the leg to reduce-only.
    ReduceOnly,
    /// Static rejection (bad parameters, insufficient margin, ...).
    Rejected,
    /// A limit order timed out or was canceled with no fill.
    NotFilled,
    /// A market order's fill could not be confirmed.
    Unresolved,
    /// The pair is quarantined by the reduce-only guard.
    Blocked,
    /// New openings are halted after a failed compensation.
    Halted,
    /// The request referenced an unknown venue or was malformed.
    InvalidRequest,
    /// An unwind order failed; a position is left unmanaged.
    CompensationFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::ReduceOnly => "reduce_only",
            Self::Rejected => "rejected",
            Self::NotFilled => "not_filled",
            Self::Unresolved => "unresolved",
            Self::Blocked => "blocked",
            Self::Halted => "halted",
            Self::InvalidRequest => "invalid_request",
            Self::CompensationFailed => "compensation_failed",
        };
        f.write_str(s)
    }
}

/// Which venue failed and what the successful leg holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub failed_venue: VenueId,
    pub success_venue: VenueId,
    /// Quantity filled on the successful leg.
    pub success_quantity: Size,
}

/// Resolution of one compensation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
    Filled,
    PartiallyFilled,
    Failed,
}

impl fmt::Display for CompensationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filled => "filled",
            Self::PartiallyFilled => "partially_filled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One unwind order issued against a completed leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationAction {
    pub venue: VenueId,
    pub instrument: InstrumentId,
    /// Side of the unwind order (opposite of the executed leg).
    pub side: OrderSide,
    pub requested: Size,
    pub filled: Size,
    pub status: CompensationStatus,
    #[serde(default)]
    pub order: Option<OrderIdentity>,
    pub reason: String,
    /// Unix milliseconds.
    pub at: u64,
}

impl CompensationAction {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.filled.is_positive()
    }
}

/// Structured result of one trade request. Never an error: every failure mode
/// is expressed through `outcome`, `failure` and the partial-failure markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub pair_id: PairId,
    pub symbol: String,
    pub outcome: ExecutionOutcome,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    #[serde(default)]
    pub buy_order: Option<OrderHandle>,
    #[serde(default)]
    pub sell_order: Option<OrderHandle>,
    /// Orders placed to close a fill shortfall, in placement order.
    #[serde(default)]
    pub corrective_orders: Vec<OrderHandle>,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub partial: Option<PartialFailure>,
    /// Quantity confirmed on both legs.
    pub executed_quantity: Size,
    #[serde(default)]
    pub compensations: Vec<CompensationAction>,
    pub started_at: u64,
    pub finished_at: u64,
}

impl ExecutionResult {
    /// Empty result for a request about to run in `mode`.
    #[must_use]
    pub fn started(pair_id: PairId, symbol: impl Into<String>, mode: ExecutionMode) -> Self {
        let now = now_ms();
        Self {
            pair_id,
            symbol: symbol.into(),
            outcome: ExecutionOutcome::Failure,
            mode: Some(mode),
            buy_order: None,
            sell_order: None,
            corrective_orders: Vec::new(),
            failure: None,
            error_message: None,
            partial: None,
            executed_quantity: Size::ZERO,
            compensations: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Result for a request refused before any order was placed.
    #[must_use]
    pub fn refused(
        pair_id: PairId,
        symbol: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            pair_id,
            symbol: symbol.into(),
            outcome: ExecutionOutcome::Failure,
            mode: None,
            buy_order: None,
            sell_order: None,
            corrective_orders: Vec::new(),
            failure: Some(kind),
            error_message: Some(message.into()),
            partial: None,
            executed_quantity: Size::ZERO,
            compensations: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Store a primary leg order under its side.
    pub fn set_order(&mut self, handle: OrderHandle) {
        match handle.side {
            OrderSide::Buy => self.buy_order = Some(handle),
            OrderSide::Sell => self.sell_order = Some(handle),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            ExecutionOutcome::Success | ExecutionOutcome::Observed
        )
    }

    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        self.outcome == ExecutionOutcome::PartialFailure
    }

    /// Total filled on one side, primary order plus corrective orders.
    #[must_use]
    pub fn leg_filled(&self, side: OrderSide) -> Size {
        let primary = match side {
            OrderSide::Buy => self.buy_order.as_ref(),
            OrderSide::Sell => self.sell_order.as_ref(),
        }
        .map_or(Size::ZERO, |o| o.filled);
        let corrective: Size = self
            .corrective_orders
            .iter()
            .filter(|o| o.side == side)
            .map(|o| o.filled)
            .sum();
        primary + corrective
    }

    /// Quantity unwound against the leg that executed `side`.
    #[must_use]
    pub fn compensated(&self, side: OrderSide) -> Size {
        self.compensations
            .iter()
            .filter(|c| c.side == side.opposite())
            .map(|c| c.filled)
            .sum()
    }
}
