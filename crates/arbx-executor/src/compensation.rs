//! Compensation (unwind) of a completed leg.
//!
//! When one leg filled and its sibling did not, the surplus is closed with an
//! opposite-direction market order on the completed venue. An unwind that
//! cannot be completed leaves an unhedged position: it is logged as an alert,
//! published as an event and, by default, halts new openings.

use std::sync::Arc;

use arbx_core::{
    now_ms, ClientOrderId, CompensationAction, CompensationStatus, FailureKind, InstrumentId,
    OrderSide, OrderType, PairId, Size, TradeLeg, TradeRequest,
};
use arbx_telemetry::Metrics;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::fill_tracker::{FillOutcome, FillTracker};
use crate::halt::{EventSink, ExecutionEvent, HaltLatch};
use crate::placement::OrderPlacer;
use crate::reduce_only::ReduceOnlyGuard;
use crate::venue::{DynVenue, NewOrder};

/// Outcome of unwinding one leg.
#[derive(Debug, Clone, Default)]
pub struct UnwindReport {
    /// Every unwind order, in placement order.
    pub actions: Vec<CompensationAction>,
    pub unwound: Size,
    /// Quantity still unhedged.
    pub remaining: Size,
    /// The venue refused the unwind with a reduce-only restriction.
    pub restricted: bool,
}

impl UnwindReport {
    /// Some quantity was unwound.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.unwound.is_positive()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Unwinds completed legs.
#[derive(Debug)]
pub struct CompensationHandler {
    config: Arc<EngineConfig>,
    placer: OrderPlacer,
    tracker: FillTracker,
    guard: Arc<ReduceOnlyGuard>,
    halt: Arc<HaltLatch>,
    events: EventSink,
}

impl CompensationHandler {
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        placer: OrderPlacer,
        tracker: FillTracker,
        guard: Arc<ReduceOnlyGuard>,
        halt: Arc<HaltLatch>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            placer,
            tracker,
            guard,
            halt,
            events,
        }
    }

    /// Close `quantity` of an executed leg with market orders.
    ///
    /// Retries the remaining quantity up to the configured number of attempts.
    /// A reduce-only rejection or an unconfirmable fill stops immediately.
    pub async fn undo_completed_leg(
        &self,
        adapter: &DynVenue,
        instrument: &InstrumentId,
        quantity: Size,
        executed_was_buy: bool,
        reason: &str,
    ) -> UnwindReport {
        let venue = adapter.venue().clone();
        let side = if executed_was_buy {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let reduce_only = self.config.venue(&venue).reduce_only_on_close;
        let mut report = UnwindReport {
            remaining: quantity,
            ..Default::default()
        };

        for attempt in 1..=self.config.compensation.max_attempts {
            if !report.remaining.is_positive() {
                break;
            }
            let requested = report.remaining;
            let order = NewOrder {
                instrument: instrument.clone(),
                side,
                order_type: OrderType::Market,
                quantity: requested,
                price: None,
                client_order_id: ClientOrderId::new(),
                reduce_only,
                slippage_tolerance: None,
            };

            let mut action = CompensationAction {
                venue: venue.clone(),
                instrument: instrument.clone(),
                side,
                requested,
                filled: Size::ZERO,
                status: CompensationStatus::Failed,
                order: None,
                reason: reason.to_string(),
                at: now_ms(),
            };

            let mut stop = false;
            match self.placer.place(adapter, order).await {
                Ok(mut handle) => {
                    let outcome = self
                        .tracker
                        .await_fill(&mut handle, adapter, self.config.compensation_timeout())
                        .await;
                    let filled = outcome.filled();
                    action.order = Some(handle.identity.clone());
                    action.filled = filled;
                    action.status = if filled >= requested {
                        CompensationStatus::Filled
                    } else if filled.is_positive() {
                        CompensationStatus::PartiallyFilled
                    } else {
                        CompensationStatus::Failed
                    };
                    report.unwound = report.unwound + filled;
                    report.remaining = report.remaining.saturating_sub(filled);
                    if outcome == FillOutcome::Unresolved {
                        warn!(
                            venue = %venue,
                            order = %handle.identity,
                            "Unwind fill unconfirmed, not re-sending"
                        );
                        stop = true;
                    }
                }
                Err(e) => {
                    warn!(venue = %venue, attempt, error = %e, "Unwind order failed");
                    action.reason = format!("{reason}; unwind failed: {e}");
                    stop = e.is_reduce_only();
                    report.restricted |= stop;
                }
            }

            info!(
                venue = %venue,
                instrument = %instrument,
                side = %side,
                requested = %requested,
                filled = %action.filled,
                status = %action.status,
                attempt,
                "Compensation order"
            );
            Metrics::compensation(venue.as_str(), &action.status.to_string());
            report.actions.push(action);
            if stop {
                break;
            }
        }
        report
    }

    /// Unwind the surplus of `completed` after `failed` fell short.
    ///
    /// A reduce-only cause quarantines the pair first. An incomplete unwind is
    /// escalated.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_asymmetric_failure(
        &self,
        request: &TradeRequest,
        adapter: &DynVenue,
        completed: &TradeLeg,
        surplus: Size,
        failed: &TradeLeg,
        cause: Option<FailureKind>,
        reason: &str,
    ) -> UnwindReport {
        if cause == Some(FailureKind::ReduceOnly) {
            self.guard.mark_restricted(
                request.pair_id(),
                request.leg_keys(),
                failed.key(),
                false,
                Some(reason),
            );
        }

        warn!(
            pair_id = %request.pair_id(),
            completed = %completed.key(),
            failed = %failed.key(),
            surplus = %surplus,
            reason,
            "Asymmetric fill, unwinding surplus"
        );
        let report = self
            .undo_completed_leg(
                adapter,
                &completed.instrument,
                surplus,
                completed.side.is_buy(),
                reason,
            )
            .await;

        if report.restricted {
            self.guard.mark_restricted(
                request.pair_id(),
                request.leg_keys(),
                completed.key(),
                true,
                Some("unwind rejected by reduce-only restriction"),
            );
        }

        if !report.is_complete() {
            self.escalate(request.pair_id(), completed, &report, reason);
        }
        report
    }

    fn escalate(&self, pair_id: &PairId, leg: &TradeLeg, report: &UnwindReport, reason: &str) {
        error!(
            alert = true,
            pair_id = %pair_id,
            venue = %leg.venue,
            instrument = %leg.instrument,
            unhedged = %report.remaining,
            attempts = report.actions.len(),
            reason,
            "Compensation failed, position left unhedged"
        );
        self.events.emit(ExecutionEvent::CompensationFailed {
            pair_id: pair_id.clone(),
            venue: leg.venue.clone(),
            instrument: leg.instrument.clone(),
            unhedged_quantity: report.remaining,
            reason: reason.to_string(),
        });
        if self.config.compensation.halt_on_failure {
            self.halt.trip(&format!(
                "unwind of {} {} on {} failed",
                report.remaining, leg.instrument, leg.venue
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VenueError;
    use crate::paper::{FillPlan, PaperVenue};
    use crate::rate_limiter::RateLimiterRegistry;
    use crate::retry::RetryPolicy;
    use crate::sequencer::OrderSequencer;
    use arbx_core::{Price, TradeIntent, VenueId};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        paper: Arc<PaperVenue>,
        adapter: DynVenue,
        handler: CompensationHandler,
        guard: Arc<ReduceOnlyGuard>,
        halt: Arc<HaltLatch>,
        events: mpsc::Receiver<ExecutionEvent>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(EngineConfig::default());
        let paper = Arc::new(PaperVenue::new("alpha"));
        let adapter: DynVenue = paper.clone();
        let sequencer = Arc::new(OrderSequencer::default());
        let tracker = FillTracker::new(Duration::from_millis(200), Arc::clone(&sequencer));
        tracker.install(&adapter).unwrap();
        let placer = OrderPlacer::new(
            tracker.clone(),
            Arc::new(RateLimiterRegistry::new(Arc::clone(&config))),
            sequencer,
            RetryPolicy::new(&config.retry),
        );
        let guard = Arc::new(ReduceOnlyGuard::new());
        let halt = Arc::new(HaltLatch::new());
        let (tx, rx) = mpsc::channel(16);
        let handler = CompensationHandler::new(
            config,
            placer,
            tracker,
            Arc::clone(&guard),
            Arc::clone(&halt),
            EventSink::new(tx),
        );
        Fixture {
            paper,
            adapter,
            handler,
            guard,
            halt,
            events: rx,
        }
    }

    fn request() -> TradeRequest {
        TradeRequest::new(
            "ETH",
            TradeLeg::new(
                VenueId::new("alpha"),
                InstrumentId::new("ETH"),
                OrderSide::Buy,
                Price::new(dec!(100)),
            ),
            TradeLeg::new(
                VenueId::new("beta"),
                InstrumentId::new("ETH"),
                OrderSide::Sell,
                Price::new(dec!(101)),
            ),
            Size::ONE,
            TradeIntent::Open,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_retries_remaining_quantity() {
        let f = fixture();
        f.paper.enqueue(FillPlan::Partial(Size::new(dec!(0.3))));
        f.paper.enqueue(FillPlan::Fill);

        let report = f
            .handler
            .undo_completed_leg(&f.adapter, &InstrumentId::new("ETH"), Size::ONE, true, "test")
            .await;

        assert!(report.succeeded());
        assert!(report.is_complete());
        assert_eq!(report.actions.len(), 2);
        assert_eq!(report.actions[0].status, CompensationStatus::PartiallyFilled);
        assert_eq!(report.actions[1].requested, Size::new(dec!(0.7)));
        assert!(report.actions.iter().all(|a| a.side == OrderSide::Sell));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_only_rejection_stops_unwind() {
        let f = fixture();
        f.paper.set_default_plan(FillPlan::Fail(VenueError::ReduceOnly(
            "invalid reduce only mode".into(),
        )));

        let report = f
            .handler
            .undo_completed_leg(&f.adapter, &InstrumentId::new("ETH"), Size::ONE, false, "test")
            .await;
        assert!(!report.succeeded());
        assert!(report.restricted);
        assert_eq!(report.actions.len(), 1);
        assert_eq!(f.paper.submissions()[0].side, OrderSide::Buy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_unwind_alerts_and_halts() {
        let mut f = fixture();
        f.paper
            .set_default_plan(FillPlan::Fail(VenueError::Rejected("market closed".into())));
        let request = request();

        let report = f
            .handler
            .handle_asymmetric_failure(
                &request,
                &f.adapter,
                request.buy_leg(),
                Size::ONE,
                request.sell_leg(),
                Some(FailureKind::ReduceOnly),
                "sell leg reduce-only",
            )
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.actions.len(), 3);
        assert!(f.halt.is_halted());
        assert!(f.guard.is_blocked(request.pair_id()));

        match f.events.try_recv() {
            Ok(ExecutionEvent::CompensationFailed {
                unhedged_quantity, ..
            }) => assert_eq!(unhedged_quantity, Size::ONE),
            other => panic!("unexpected {other:?}"),
        }
    }
}
