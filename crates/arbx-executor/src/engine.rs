//! Execution orchestrator.
//!
//! [`ExecutionEngine`] is the facade callers hand trade requests to. It owns
//! every component (rate limiters, fill tracker, guard, halt latch, strategy)
//! and always answers with an [`ExecutionResult`], never an error.

use std::sync::Arc;

use arbx_core::{
    ClientOrderId, ExecutionOutcome, ExecutionResult, FailureKind, LegKey, OrderSide, OrderType,
    Size, TradeRequest, VenueId,
};
use arbx_telemetry::Metrics;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::compensation::CompensationHandler;
use crate::config::EngineConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::fill_tracker::FillTracker;
use crate::halt::{EventSink, ExecutionEvent, HaltLatch};
use crate::placement::OrderPlacer;
use crate::rate_limiter::RateLimiterRegistry;
use crate::reduce_only::ReduceOnlyGuard;
use crate::retry::RetryPolicy;
use crate::sequencer::OrderSequencer;
use crate::strategy::{ExecutionPlan, OrderStrategyExecutor};
use crate::venue::{DynVenue, NewOrder, VenueRegistry};

/// Two-leg execution engine.
#[derive(Debug)]
pub struct ExecutionEngine {
    config: Arc<EngineConfig>,
    venues: VenueRegistry,
    limiters: Arc<RateLimiterRegistry>,
    tracker: FillTracker,
    placer: OrderPlacer,
    strategy: OrderStrategyExecutor,
    guard: Arc<ReduceOnlyGuard>,
    halt: Arc<HaltLatch>,
    events: EventSink,
    /// Start of the previous round, for inter-round pacing.
    last_round: AsyncMutex<Option<Instant>>,
}

impl ExecutionEngine {
    /// Build the engine and subscribe to every venue's push channel.
    pub fn new(
        config: EngineConfig,
        venues: VenueRegistry,
        events: EventSink,
    ) -> ExecutorResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let sequenced: Vec<VenueId> = venues
            .iter()
            .filter(|(venue, _)| config.venue(venue).sequenced_orders)
            .map(|(venue, _)| venue.clone())
            .collect();
        let sequencer = Arc::new(OrderSequencer::new(sequenced));

        let tracker = FillTracker::new(config.poll_interval(), Arc::clone(&sequencer));
        for (venue, adapter) in venues.iter() {
            let push = tracker.install(adapter)?;
            info!(venue = %venue, push, "Venue registered");
        }

        let limiters = Arc::new(RateLimiterRegistry::new(Arc::clone(&config)));
        let placer = OrderPlacer::new(
            tracker.clone(),
            Arc::clone(&limiters),
            sequencer,
            RetryPolicy::new(&config.retry),
        );
        let guard = Arc::new(ReduceOnlyGuard::new());
        let halt = Arc::new(HaltLatch::new());
        let compensation = Arc::new(CompensationHandler::new(
            Arc::clone(&config),
            placer.clone(),
            tracker.clone(),
            Arc::clone(&guard),
            Arc::clone(&halt),
            events.clone(),
        ));
        let strategy = OrderStrategyExecutor::new(
            Arc::clone(&config),
            venues.clone(),
            placer.clone(),
            tracker.clone(),
            compensation,
            Arc::clone(&guard),
            events.clone(),
        );

        info!(
            mode = ?config.mode,
            venues = venues.len(),
            segmented = config.segmented,
            "Execution engine ready"
        );
        Ok(Self {
            config,
            venues,
            limiters,
            tracker,
            placer,
            strategy,
            guard,
            halt,
            events,
            last_round: AsyncMutex::new(None),
        })
    }

    /// Execute one trade request.
    ///
    /// # Gate Checks
    ///
    /// 1. Unknown venue -> `InvalidRequest`
    /// 2. Observation mode -> `Observed`
    /// 3. Opening while halted -> `Halted`
    /// 4. Opening on a reduce-only pair -> `Blocked`
    /// 5. Closing on a closing-blocked pair -> `Blocked`
    pub async fn execute(&self, request: &TradeRequest) -> ExecutionResult {
        let started = Instant::now();
        let plan = ExecutionPlan::resolve(&self.config, request);

        let result = match self.admit(request, &plan) {
            Some(refused) => refused,
            None => self.run(request, &plan).await,
        };

        Metrics::execution_finished(&plan.mode.to_string(), &result.outcome.to_string());
        self.events.emit(ExecutionEvent::TradeCompleted {
            pair_id: result.pair_id.clone(),
            outcome: result.outcome,
            executed_quantity: result.executed_quantity,
        });
        info!(
            pair_id = %result.pair_id,
            mode = %plan.mode,
            outcome = %result.outcome,
            failure = ?result.failure,
            executed = %result.executed_quantity,
            corrective = result.corrective_orders.len(),
            compensations = result.compensations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Trade request finished"
        );
        result
    }

    /// Gate checks. Returns the refusal, if any.
    fn admit(&self, request: &TradeRequest, plan: &ExecutionPlan) -> Option<ExecutionResult> {
        let refuse = |kind: FailureKind, message: String| {
            Some(ExecutionResult::refused(
                request.pair_id().clone(),
                request.symbol(),
                kind,
                message,
            ))
        };

        for leg in request.legs() {
            if self.venues.get(&leg.venue).is_none() {
                return refuse(
                    FailureKind::InvalidRequest,
                    format!("no adapter registered for venue {}", leg.venue),
                );
            }
        }

        if self.config.is_observation_mode() {
            info!(
                pair_id = %request.pair_id(),
                mode = %plan.mode,
                buy = %plan_leg(request, OrderSide::Buy),
                sell = %plan_leg(request, OrderSide::Sell),
                quantity = %request.quantity(),
                intent = ?request.intent(),
                "Observation mode, trade not sent"
            );
            let mut observed =
                ExecutionResult::started(request.pair_id().clone(), request.symbol(), plan.mode);
            observed.outcome = ExecutionOutcome::Observed;
            return Some(observed);
        }

        if request.is_open() {
            if self.halt.is_halted() {
                let reason = self.halt.reason().unwrap_or_default();
                let secs = self.halt.halted_for().map_or(0, |d| d.as_secs());
                return refuse(
                    FailureKind::Halted,
                    format!("openings halted {secs}s ago: {reason}"),
                );
            }
            if self.guard.is_blocked(request.pair_id()) {
                return refuse(
                    FailureKind::Blocked,
                    format!("pair {} is reduce-only", request.pair_id()),
                );
            }
        } else if self.guard.is_closing_blocked(request.pair_id()) {
            return refuse(
                FailureKind::Blocked,
                format!("closing blocked on pair {}", request.pair_id()),
            );
        }
        None
    }

    async fn run(&self, request: &TradeRequest, plan: &ExecutionPlan) -> ExecutionResult {
        self.pace_round().await;

        let venues: Vec<VenueId> = request.legs().iter().map(|l| l.venue.clone()).collect();
        let leases = match self.limiters.reserve_all(&venues).await {
            Ok(leases) => leases,
            Err(e) => {
                warn!(pair_id = %request.pair_id(), error = %e, "Rate limit reservation failed");
                let message = e.to_string();
                return ExecutionResult::refused(
                    request.pair_id().clone(),
                    request.symbol(),
                    e.into(),
                    message,
                );
            }
        };

        let result = self.strategy.execute(request, plan).await;
        leases.release();
        result
    }

    /// Keep `round_pause` between consecutive rounds unless segmented.
    async fn pace_round(&self) {
        if self.config.segmented {
            return;
        }
        let pause = self.config.round_pause();
        if pause.is_zero() {
            return;
        }

        let mut last = self.last_round.lock().await;
        if let Some(previous) = *last {
            let ready = previous + pause;
            if Instant::now() < ready {
                debug!(
                    wait_ms = (ready - Instant::now()).as_millis() as u64,
                    "Pacing round"
                );
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }

    // ------------------------------------------------------------------
    // Probing
    // ------------------------------------------------------------------

    /// Send a minimal opening order on `leg` and close it again.
    ///
    /// Returns true when the venue accepted the opening order, i.e. the leg
    /// is no longer reduce-only.
    pub async fn probe_leg(&self, leg: &LegKey, quantity: Size) -> bool {
        if self.config.is_observation_mode() {
            return false;
        }
        let Some(adapter) = self.venues.get(&leg.venue) else {
            warn!(leg = %leg, "Probe skipped, venue not registered");
            return false;
        };
        let lease = match self.limiters.reserve(&leg.venue).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(leg = %leg, error = %e, "Probe skipped, no rate limit lease");
                return false;
            }
        };

        let open = NewOrder {
            instrument: leg.instrument.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity,
            price: None,
            client_order_id: ClientOrderId::new(),
            reduce_only: false,
            slippage_tolerance: None,
        };
        let success = match self.placer.place(adapter, open).await {
            Ok(mut handle) => {
                let outcome = self
                    .tracker
                    .await_fill(&mut handle, adapter, self.config.market_order_timeout())
                    .await;
                let filled = outcome.filled();
                if filled.is_positive() {
                    self.close_probe(adapter, leg, filled).await;
                }
                true
            }
            Err(e) if e.is_reduce_only() => {
                info!(leg = %leg, error = %e, "Probe rejected, leg still reduce-only");
                false
            }
            Err(e) => {
                warn!(leg = %leg, error = %e, "Probe order failed");
                false
            }
        };
        lease.release();

        Metrics::reduce_only_probe(leg.venue.as_str(), success);
        success
    }

    async fn close_probe(&self, adapter: &DynVenue, leg: &LegKey, quantity: Size) {
        let close = NewOrder {
            instrument: leg.instrument.clone(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity,
            price: None,
            client_order_id: ClientOrderId::new(),
            reduce_only: true,
            slippage_tolerance: None,
        };
        match self.placer.place(adapter, close).await {
            Ok(mut handle) => {
                let closed = self
                    .tracker
                    .await_fill(&mut handle, adapter, self.config.market_order_timeout())
                    .await
                    .filled();
                if closed < quantity {
                    warn!(
                        alert = true,
                        leg = %leg,
                        opened = %quantity,
                        closed = %closed,
                        "Probe position not fully closed"
                    );
                }
            }
            Err(e) => {
                warn!(
                    alert = true,
                    leg = %leg,
                    quantity = %quantity,
                    error = %e,
                    "Probe close failed"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<ReduceOnlyGuard> {
        &self.guard
    }

    #[must_use]
    pub fn halt(&self) -> &Arc<HaltLatch> {
        &self.halt
    }

    #[must_use]
    pub fn limiters(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiters
    }

    #[must_use]
    pub fn tracker(&self) -> &FillTracker {
        &self.tracker
    }

    #[must_use]
    pub fn events(&self) -> &EventSink {
        &self.events
    }
}

fn plan_leg(request: &TradeRequest, side: OrderSide) -> String {
    let leg = request.leg(side);
    format!("{}@{}", leg.key(), leg.target_price)
}

impl From<ExecutorError> for FailureKind {
    fn from(error: ExecutorError) -> Self {
        match error {
            ExecutorError::Venue(e) => e.failure_kind(),
            ExecutorError::InvalidRequest(_) | ExecutorError::UnknownVenue(_) => {
                FailureKind::InvalidRequest
            }
            ExecutorError::Config(_) | ExecutorError::LimiterClosed(_) => FailureKind::Halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingMode;
    use crate::error::VenueError;
    use crate::paper::{FillPlan, PaperVenue};
    use arbx_core::{InstrumentId, Price, TradeIntent, TradeLeg};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn trading_config() -> EngineConfig {
        EngineConfig {
            mode: OperatingMode::Trading,
            ..Default::default()
        }
    }

    fn request(intent: TradeIntent) -> TradeRequest {
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
            intent,
        )
        .unwrap()
    }

    fn engine(config: EngineConfig) -> (ExecutionEngine, Arc<PaperVenue>, Arc<PaperVenue>) {
        let alpha = Arc::new(PaperVenue::new("alpha"));
        let beta = Arc::new(PaperVenue::new("beta"));
        let venues = VenueRegistry::new()
            .with(alpha.clone() as DynVenue)
            .with(beta.clone() as DynVenue);
        let engine = ExecutionEngine::new(config, venues, EventSink::disabled()).unwrap();
        (engine, alpha, beta)
    }

    #[tokio::test(start_paused = true)]
    async fn test_observation_mode_places_nothing() {
        let (engine, alpha, beta) = engine(EngineConfig::default());

        let result = engine.execute(&request(TradeIntent::Open)).await;
        assert_eq!(result.outcome, ExecutionOutcome::Observed);
        assert!(result.is_success());
        assert!(alpha.submissions().is_empty());
        assert!(beta.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_venue_is_refused() {
        let alpha = Arc::new(PaperVenue::new("alpha"));
        let venues = VenueRegistry::new().with(alpha.clone() as DynVenue);
        let engine = ExecutionEngine::new(trading_config(), venues, EventSink::disabled()).unwrap();

        let result = engine.execute(&request(TradeIntent::Open)).await;
        assert_eq!(result.failure, Some(FailureKind::InvalidRequest));
        assert!(alpha.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_refuses_openings_only() {
        let (engine, alpha, _beta) = engine(trading_config());
        engine.halt().trip("unwind failed");

        let result = engine.execute(&request(TradeIntent::Open)).await;
        assert_eq!(result.failure, Some(FailureKind::Halted));
        assert!(alpha.submissions().is_empty());

        let result = engine.execute(&request(TradeIntent::Close)).await;
        assert_ne!(result.failure, Some(FailureKind::Halted));
        assert!(!alpha.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_pair_allows_closing() {
        let (engine, _alpha, beta) = engine(trading_config());
        let req = request(TradeIntent::Open);
        let beta_leg = req.sell_leg().key();
        engine
            .guard()
            .mark_restricted(req.pair_id(), req.leg_keys(), beta_leg.clone(), false, None);

        let result = engine.execute(&req).await;
        assert_eq!(result.failure, Some(FailureKind::Blocked));
        assert!(beta.submissions().is_empty());

        let result = engine.execute(&request(TradeIntent::Close)).await;
        assert_ne!(result.failure, Some(FailureKind::Blocked));

        engine
            .guard()
            .mark_restricted(req.pair_id(), req.leg_keys(), beta_leg, true, None);
        let result = engine.execute(&request(TradeIntent::Close)).await;
        assert_eq!(result.failure, Some(FailureKind::Blocked));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_pause_spaces_requests() {
        let mut config = trading_config();
        config.round_pause_ms = 5_000;
        let (engine, _alpha, _beta) = engine(config);

        let start = Instant::now();
        engine.execute(&request(TradeIntent::Close)).await;
        engine.execute(&request(TradeIntent::Close)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_opens_and_closes() {
        let (engine, alpha, _beta) = engine(trading_config());
        let leg = LegKey::new(VenueId::new("alpha"), InstrumentId::new("ETH"));

        alpha.set_openings_restricted(true);
        assert!(!engine.probe_leg(&leg, Size::new(dec!(0.001))).await);
        assert_eq!(alpha.submissions().len(), 1);

        alpha.set_openings_restricted(false);
        assert!(engine.probe_leg(&leg, Size::new(dec!(0.001))).await);
        let submissions = alpha.submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[2].side, OrderSide::Sell);
        assert!(submissions[2].reduce_only);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_counts_acceptance_without_fill() {
        let (engine, alpha, _beta) = engine(trading_config());
        let leg = LegKey::new(VenueId::new("alpha"), InstrumentId::new("ETH"));
        alpha.enqueue(FillPlan::Partial(Size::ZERO));

        assert!(engine.probe_leg(&leg, Size::new(dec!(0.001))).await);
        // Nothing filled, nothing to close.
        assert_eq!(alpha.submissions().len(), 1);

        alpha.enqueue(FillPlan::Fail(VenueError::Rejected("bad size".into())));
        assert!(!engine.probe_leg(&leg, Size::new(dec!(0.001))).await);
    }
}
