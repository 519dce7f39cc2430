//! Opening halt latch and execution events.
//!
//! - `HaltLatch`: refuses new openings after an unwind failed
//! - `ExecutionEvent`: notifications for an external alerting consumer

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arbx_core::{ExecutionOutcome, InstrumentId, LegKey, PairId, Size, VenueId};
use arbx_telemetry::Metrics;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, warn};

// ============================================================================
// HaltLatch
// ============================================================================

/// Latch that stops new openings.
///
/// Tripped when a compensation fails and a position is left unhedged. Closing
/// requests still run. Stays tripped until an operator calls [`HaltLatch::reset`].
#[derive(Debug, Default)]
pub struct HaltLatch {
    halted: AtomicBool,
    reason: Mutex<Option<String>>,
    since: Mutex<Option<Instant>>,
}

impl HaltLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Trip the latch. The first reason is kept.
    pub fn trip(&self, reason: &str) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            *self.reason.lock() = Some(reason.to_string());
            *self.since.lock() = Some(Instant::now());
            error!(reason, alert = true, "Openings halted");
            Metrics::halted(true);
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    #[must_use]
    pub fn halted_for(&self) -> Option<Duration> {
        self.since.lock().map(|t| t.elapsed())
    }

    /// Operator reset.
    pub fn reset(&self) {
        self.halted.store(false, Ordering::Release);
        *self.reason.lock() = None;
        *self.since.lock() = None;
        warn!("Opening halt reset by operator");
        Metrics::halted(false);
    }
}

// ============================================================================
// ExecutionEvent
// ============================================================================

/// Notifications emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A trade request finished.
    TradeCompleted {
        pair_id: PairId,
        outcome: ExecutionOutcome,
        executed_quantity: Size,
    },

    /// A leg was restricted to reduce-only by its venue.
    ReduceOnlyDetected {
        pair_id: PairId,
        leg: LegKey,
        reason: String,
    },

    /// A probe cleared a reduce-only restriction.
    ReduceOnlyCleared { pair_id: PairId, leg: LegKey },

    /// An unwind failed. The position on `venue` is unhedged.
    CompensationFailed {
        pair_id: PairId,
        venue: VenueId,
        instrument: InstrumentId,
        unhedged_quantity: Size,
        reason: String,
    },
}

/// Optional event sink. Sends never block; a full or closed channel drops
/// the event with a warning.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ExecutionEvent>>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ExecutionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "Dropping execution event");
            }
        }
    }
}
