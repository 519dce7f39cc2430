//! Order strategy executor.
//!
//! Picks the order shape for a trade pair and drives both legs to a terminal
//! state:
//! - `LimitMarket`: leg A rests as a limit order, leg B follows at market for
//!   whatever A filled
//! - `MarketMarket`: both legs at market, concurrently
//! - `LimitLimit`: both legs as limit orders, concurrently, then the
//!   under-filled leg is topped up until both match
//!
//! Any surplus left after that is unwound by the [`CompensationHandler`].

use std::sync::Arc;

use arbx_core::{
    ClientOrderId, ExecutionMode, ExecutionOutcome, ExecutionResult, FailureKind, OrderHandle,
    OrderType, PartialFailure, Price, Size, TradeLeg, TradeRequest,
};
use tracing::{debug, error, info, warn};

use crate::compensation::CompensationHandler;
use crate::config::{EngineConfig, OrderModeConfig};
use crate::error::VenueError;
use crate::fill_tracker::{FillOutcome, FillTracker};
use crate::halt::{EventSink, ExecutionEvent};
use crate::placement::OrderPlacer;
use crate::reduce_only::ReduceOnlyGuard;
use crate::venue::{NewOrder, VenueRegistry};

// ============================================================================
// ExecutionPlan
// ============================================================================

/// Order shape and leg order for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    /// Leads in `LimitMarket`; the buy leg otherwise.
    pub leg_a: TradeLeg,
    pub leg_b: TradeLeg,
}

impl ExecutionPlan {
    /// Select the shape from the order modes configured for both legs.
    #[must_use]
    pub fn resolve(config: &EngineConfig, request: &TradeRequest) -> Self {
        let buy = request.buy_leg();
        let sell = request.sell_leg();
        let buy_mode = config.order_mode(&buy.venue, &buy.instrument);
        let sell_mode = config.order_mode(&sell.venue, &sell.instrument);

        let (mode, leg_a, leg_b) = match (buy_mode.order_type, sell_mode.order_type) {
            (OrderType::Market, OrderType::Market) => (ExecutionMode::MarketMarket, buy, sell),
            (OrderType::Limit, OrderType::Market) => (ExecutionMode::LimitMarket, buy, sell),
            (OrderType::Market, OrderType::Limit) => (ExecutionMode::LimitMarket, sell, buy),
            (OrderType::Limit, OrderType::Limit) => {
                let concurrent = config.limit_limit.enabled
                    && !buy_mode.force_sequential_limit
                    && !sell_mode.force_sequential_limit;
                if concurrent {
                    (ExecutionMode::LimitLimit, buy, sell)
                } else if sell_mode.priority > buy_mode.priority {
                    (ExecutionMode::LimitMarket, sell, buy)
                } else {
                    (ExecutionMode::LimitMarket, buy, sell)
                }
            }
        };

        Self {
            mode,
            leg_a: leg_a.clone(),
            leg_b: leg_b.clone(),
        }
    }
}

/// Limit price for a leg.
///
/// An absolute per-leg offset wins and crosses the spread (buy above, sell
/// below the target). Tick precision steps one tick inside the target. The
/// percentage offset crosses by `limit_offset_pct`.
#[must_use]
pub fn limit_price(leg: &TradeLeg, mode: &OrderModeConfig) -> Price {
    let target = leg.target_price;
    let is_buy = leg.side.is_buy();

    if let Some(offset) = leg.price_offset.filter(Price::is_positive) {
        let price = if is_buy {
            target + offset
        } else {
            target - offset
        };
        return if price.is_positive() { price } else { target };
    }

    if mode.use_tick_precision {
        let step = mode.tick_size.unwrap_or_else(|| target.step_from_scale());
        return if is_buy {
            let price = target - step;
            let price = if price.is_positive() { price } else { step };
            price.round_to_tick(step)
        } else {
            (target + step).round_up_to_tick(step)
        };
    }

    let pct = mode.limit_offset_pct;
    let price = if is_buy {
        target.offset_pct(pct)
    } else {
        target.offset_pct(-pct)
    };
    match mode.tick_size {
        Some(tick) if is_buy => price.round_to_tick(tick),
        Some(tick) => price.round_up_to_tick(tick),
        None => price,
    }
}

// ============================================================================
// Leg bookkeeping
// ============================================================================

/// One placement and its resolution.
#[derive(Debug)]
struct LegRun {
    handle: Option<OrderHandle>,
    outcome: FillOutcome,
    error: Option<VenueError>,
}

impl LegRun {
    fn failed(error: VenueError) -> Self {
        Self {
            handle: None,
            outcome: FillOutcome::NotFilled,
            error: Some(error),
        }
    }

    fn filled(&self) -> Size {
        self.outcome.filled()
    }
}

/// Running totals for one leg across its primary and corrective orders.
#[derive(Debug)]
struct LegTally<'a> {
    leg: &'a TradeLeg,
    filled: Size,
    error: Option<VenueError>,
    unresolved: bool,
}

impl<'a> LegTally<'a> {
    fn new(leg: &'a TradeLeg) -> Self {
        Self {
            leg,
            filled: Size::ZERO,
            error: None,
            unresolved: false,
        }
    }

    /// Add a run's fill and keep its first error. Returns the order handle.
    fn absorb(&mut self, run: LegRun) -> Option<OrderHandle> {
        self.filled = self.filled + run.filled();
        self.unresolved |= run.outcome == FillOutcome::Unresolved;
        if self.error.is_none() {
            self.error = run.error;
        }
        run.handle
    }

    fn cause(&self) -> FailureKind {
        match &self.error {
            Some(e) => e.failure_kind(),
            None if self.unresolved => FailureKind::Unresolved,
            None => FailureKind::NotFilled,
        }
    }

    fn reason(&self) -> String {
        match &self.error {
            Some(e) => format!("{} leg on {}: {e}", self.leg.side, self.leg.venue),
            None if self.unresolved => {
                format!("{} leg on {}: fill unconfirmed", self.leg.side, self.leg.venue)
            }
            None => format!("{} leg on {}: not filled", self.leg.side, self.leg.venue),
        }
    }
}

// ============================================================================
// OrderStrategyExecutor
// ============================================================================

/// Places and reconciles the two legs of a trade request.
#[derive(Debug)]
pub struct OrderStrategyExecutor {
    config: Arc<EngineConfig>,
    venues: VenueRegistry,
    placer: OrderPlacer,
    tracker: FillTracker,
    compensation: Arc<CompensationHandler>,
    guard: Arc<ReduceOnlyGuard>,
    events: EventSink,
}

impl OrderStrategyExecutor {
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        venues: VenueRegistry,
        placer: OrderPlacer,
        tracker: FillTracker,
        compensation: Arc<CompensationHandler>,
        guard: Arc<ReduceOnlyGuard>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            venues,
            placer,
            tracker,
            compensation,
            guard,
            events,
        }
    }

    /// Run `plan` for `request`. The caller holds both venues' leases.
    pub async fn execute(&self, request: &TradeRequest, plan: &ExecutionPlan) -> ExecutionResult {
        let mut result =
            ExecutionResult::started(request.pair_id().clone(), request.symbol(), plan.mode);
        debug!(
            pair_id = %request.pair_id(),
            mode = %plan.mode,
            leg_a = %plan.leg_a.key(),
            leg_b = %plan.leg_b.key(),
            quantity = %request.quantity(),
            "Executing trade pair"
        );

        match plan.mode {
            ExecutionMode::LimitMarket => self.limit_market(request, plan, &mut result).await,
            ExecutionMode::MarketMarket => self.market_market(request, plan, &mut result).await,
            ExecutionMode::LimitLimit => self.limit_limit(request, plan, &mut result).await,
        }

        result.finished_at = arbx_core::now_ms();
        result
    }

    // ------------------------------------------------------------------
    // Shapes
    // ------------------------------------------------------------------

    async fn limit_market(
        &self,
        request: &TradeRequest,
        plan: &ExecutionPlan,
        result: &mut ExecutionResult,
    ) {
        let mut a = LegTally::new(&plan.leg_a);
        let mut b = LegTally::new(&plan.leg_b);

        let price = self.limit_price(&plan.leg_a);
        let run = self
            .execute_leg(request, &plan.leg_a, OrderType::Limit, request.quantity(), Some(price))
            .await;
        if let Some(handle) = a.absorb(run) {
            result.set_order(handle);
        }

        if !a.filled.is_positive() {
            info!(
                pair_id = %request.pair_id(),
                leg = %plan.leg_a.key(),
                "Leading limit leg not filled, skipping market leg"
            );
            result.outcome = ExecutionOutcome::Failure;
            result.failure = Some(a.cause());
            result.error_message = Some(a.reason());
            return;
        }

        let run = self
            .execute_leg(request, &plan.leg_b, OrderType::Market, a.filled, None)
            .await;
        if let Some(handle) = b.absorb(run) {
            result.set_order(handle);
        }

        if b.filled < a.filled && b.error.is_none() && !b.unresolved {
            let shortfall = a.filled - b.filled;
            info!(
                pair_id = %request.pair_id(),
                leg = %plan.leg_b.key(),
                shortfall = %shortfall,
                "Market leg short, placing corrective order"
            );
            let run = self
                .execute_leg(request, &plan.leg_b, OrderType::Market, shortfall, None)
                .await;
            if let Some(handle) = b.absorb(run) {
                result.corrective_orders.push(handle);
            }
        }

        self.reconcile(request, result, a, b).await;
    }

    async fn market_market(
        &self,
        request: &TradeRequest,
        plan: &ExecutionPlan,
        result: &mut ExecutionResult,
    ) {
        let mut a = LegTally::new(&plan.leg_a);
        let mut b = LegTally::new(&plan.leg_b);

        let quantity = request.quantity();
        let (run_a, run_b) = tokio::join!(
            self.execute_leg(request, &plan.leg_a, OrderType::Market, quantity, None),
            self.execute_leg(request, &plan.leg_b, OrderType::Market, quantity, None),
        );
        if let Some(handle) = a.absorb(run_a) {
            result.set_order(handle);
        }
        if let Some(handle) = b.absorb(run_b) {
            result.set_order(handle);
        }

        self.reconcile(request, result, a, b).await;
    }

    async fn limit_limit(
        &self,
        request: &TradeRequest,
        plan: &ExecutionPlan,
        result: &mut ExecutionResult,
    ) {
        let mut a = LegTally::new(&plan.leg_a);
        let mut b = LegTally::new(&plan.leg_b);

        let quantity = request.quantity();
        let price_a = self.limit_price(&plan.leg_a);
        let price_b = self.limit_price(&plan.leg_b);
        let (run_a, run_b) = tokio::join!(
            self.execute_leg(request, &plan.leg_a, OrderType::Limit, quantity, Some(price_a)),
            self.execute_leg(request, &plan.leg_b, OrderType::Limit, quantity, Some(price_b)),
        );
        if let Some(handle) = a.absorb(run_a) {
            result.set_order(handle);
        }
        if let Some(handle) = b.absorb(run_b) {
            result.set_order(handle);
        }

        if a.filled != b.filled {
            let (over, under) = if a.filled > b.filled {
                (&a, &mut b)
            } else {
                (&b, &mut a)
            };
            if under.error.is_none() {
                let corrective = self.converge(request, over.filled, under).await;
                result.corrective_orders.extend(corrective);
            }
        }

        self.reconcile(request, result, a, b).await;
    }

    /// Top up `under` to `target`: limit orders up to the configured budget,
    /// then one market order. Stops on the first error.
    async fn converge(
        &self,
        request: &TradeRequest,
        target: Size,
        under: &mut LegTally<'_>,
    ) -> Vec<OrderHandle> {
        let budget = self.config.limit_limit.corrective_limit_attempts;
        let leg = under.leg;
        let mut placed = Vec::new();
        let mut attempt = 0;

        while under.filled < target {
            let shortfall = target - under.filled;
            let escalate = attempt >= budget;
            let (order_type, price) = if escalate {
                (OrderType::Market, None)
            } else {
                (OrderType::Limit, Some(self.limit_price(leg)))
            };
            info!(
                pair_id = %request.pair_id(),
                leg = %leg.key(),
                shortfall = %shortfall,
                order_type = %order_type,
                attempt = attempt + 1,
                "Leg short, placing corrective order"
            );

            let run = self
                .execute_leg(request, leg, order_type, shortfall, price)
                .await;
            let failed = run.error.is_some();
            if let Some(handle) = under.absorb(run) {
                placed.push(handle);
            }
            if failed || escalate {
                break;
            }
            attempt += 1;
        }
        placed
    }

    /// Turn leg totals into the result, unwinding any surplus.
    async fn reconcile(
        &self,
        request: &TradeRequest,
        result: &mut ExecutionResult,
        a: LegTally<'_>,
        b: LegTally<'_>,
    ) {
        let executed = a.filled.min(b.filled);
        result.executed_quantity = executed;

        if a.filled == b.filled {
            if executed.is_positive() {
                result.outcome = ExecutionOutcome::Success;
            } else {
                let first = if a.error.is_some() || b.error.is_none() {
                    &a
                } else {
                    &b
                };
                result.outcome = ExecutionOutcome::Failure;
                result.failure = Some(first.cause());
                result.error_message = Some(first.reason());
            }
            return;
        }

        let (over, under) = if a.filled > b.filled { (a, b) } else { (b, a) };
        let surplus = over.filled - under.filled;
        let cause = under.cause();
        let reason = under.reason();

        result.outcome = ExecutionOutcome::PartialFailure;
        result.partial = Some(PartialFailure {
            failed_venue: under.leg.venue.clone(),
            success_venue: over.leg.venue.clone(),
            success_quantity: over.filled,
        });
        result.error_message = Some(reason.clone());

        let Some(adapter) = self.venues.get(&over.leg.venue) else {
            error!(
                alert = true,
                pair_id = %request.pair_id(),
                venue = %over.leg.venue,
                surplus = %surplus,
                "No adapter to unwind surplus"
            );
            result.failure = Some(FailureKind::CompensationFailed);
            return;
        };

        let report = self
            .compensation
            .handle_asymmetric_failure(
                request,
                adapter,
                over.leg,
                surplus,
                under.leg,
                Some(cause),
                &reason,
            )
            .await;

        result.failure = Some(if report.is_complete() {
            cause
        } else {
            FailureKind::CompensationFailed
        });
        result.compensations.extend(report.actions);
    }

    // ------------------------------------------------------------------
    // Single leg
    // ------------------------------------------------------------------

    fn limit_price(&self, leg: &TradeLeg) -> Price {
        limit_price(leg, &self.config.order_mode(&leg.venue, &leg.instrument))
    }

    /// Place one order for `leg` and wait for it to settle.
    async fn execute_leg(
        &self,
        request: &TradeRequest,
        leg: &TradeLeg,
        order_type: OrderType,
        quantity: Size,
        price: Option<Price>,
    ) -> LegRun {
        let Some(adapter) = self.venues.get(&leg.venue) else {
            return LegRun::failed(VenueError::Rejected(format!(
                "no adapter for venue {}",
                leg.venue
            )));
        };
        if let Some(min) = request.min_order_quantity(&leg.venue) {
            if quantity < min {
                warn!(
                    venue = %leg.venue,
                    quantity = %quantity,
                    min = %min,
                    "Leg quantity below venue minimum"
                );
                return LegRun::failed(VenueError::Rejected(format!(
                    "quantity {quantity} below minimum {min} on {}",
                    leg.venue
                )));
            }
        }

        let order = NewOrder {
            instrument: leg.instrument.clone(),
            side: leg.side,
            order_type,
            quantity,
            price,
            client_order_id: ClientOrderId::new(),
            reduce_only: !request.is_open() && self.config.venue(&leg.venue).reduce_only_on_close,
            slippage_tolerance: if order_type.is_market() {
                request.slippage_tolerance()
            } else {
                None
            },
        };

        match self.placer.place(adapter, order).await {
            Ok(mut handle) => {
                let timeout = match order_type {
                    OrderType::Limit => self.config.limit_order_timeout(),
                    OrderType::Market => self.config.market_order_timeout(),
                };
                let outcome = self.tracker.await_fill(&mut handle, adapter, timeout).await;
                LegRun {
                    handle: Some(handle),
                    outcome,
                    error: None,
                }
            }
            Err(e) => {
                if e.is_reduce_only() {
                    self.on_reduce_only(request, leg, &e);
                }
                LegRun::failed(e)
            }
        }
    }

    fn on_reduce_only(&self, request: &TradeRequest, leg: &TradeLeg, error: &VenueError) {
        let reason = error.to_string();
        self.guard.mark_restricted(
            request.pair_id(),
            request.leg_keys(),
            leg.key(),
            !request.is_open(),
            Some(&reason),
        );
        self.events.emit(ExecutionEvent::ReduceOnlyDetected {
            pair_id: request.pair_id().clone(),
            leg: leg.key(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VenueConfig;
    use arbx_core::{InstrumentId, OrderSide, TradeIntent, VenueId};
    use rust_decimal_macros::dec;

    fn leg(venue: &str, side: OrderSide, price: rust_decimal::Decimal) -> TradeLeg {
        TradeLeg::new(
            VenueId::new(venue),
            InstrumentId::new("ETH"),
            side,
            Price::new(price),
        )
    }

    fn request() -> TradeRequest {
        TradeRequest::new(
            "ETH",
            leg("alpha", OrderSide::Buy, dec!(100)),
            leg("beta", OrderSide::Sell, dec!(101)),
            Size::ONE,
            TradeIntent::Open,
        )
        .unwrap()
    }

    fn config_with(alpha: OrderType, beta: OrderType) -> EngineConfig {
        let mut config = EngineConfig::default();
        for (name, order_type) in [("alpha", alpha), ("beta", beta)] {
            let mut venue = VenueConfig::default();
            venue.order_mode.order_type = order_type;
            config.venues.insert(name.to_string(), venue);
        }
        config
    }

    #[test]
    fn test_plan_follows_order_modes() {
        let request = request();

        let plan = ExecutionPlan::resolve(
            &config_with(OrderType::Market, OrderType::Market),
            &request,
        );
        assert_eq!(plan.mode, ExecutionMode::MarketMarket);

        let plan = ExecutionPlan::resolve(
            &config_with(OrderType::Market, OrderType::Limit),
            &request,
        );
        assert_eq!(plan.mode, ExecutionMode::LimitMarket);
        assert_eq!(plan.leg_a.venue, VenueId::new("beta"));

        let plan =
            ExecutionPlan::resolve(&config_with(OrderType::Limit, OrderType::Limit), &request);
        assert_eq!(plan.mode, ExecutionMode::LimitLimit);
    }

    #[test]
    fn test_sequential_limit_leads_with_priority() {
        let request = request();
        let mut config = config_with(OrderType::Limit, OrderType::Limit);
        config.limit_limit.enabled = false;
        if let Some(beta) = config.venues.get_mut("beta") {
            beta.order_mode.priority = 5;
        }

        let plan = ExecutionPlan::resolve(&config, &request);
        assert_eq!(plan.mode, ExecutionMode::LimitMarket);
        assert_eq!(plan.leg_a.venue, VenueId::new("beta"));

        // Equal priority: the buy leg leads.
        config.limit_limit.enabled = true;
        if let Some(alpha) = config.venues.get_mut("alpha") {
            alpha.order_mode.force_sequential_limit = true;
            alpha.order_mode.priority = 5;
        }
        let plan = ExecutionPlan::resolve(&config, &request);
        assert_eq!(plan.mode, ExecutionMode::LimitMarket);
        assert_eq!(plan.leg_a.venue, VenueId::new("alpha"));
    }

    #[test]
    fn test_override_by_instrument() {
        let request = request();
        let mut config = config_with(OrderType::Limit, OrderType::Limit);
        config.order_mode_overrides.insert(
            "beta:ETH".to_string(),
            OrderModeConfig {
                order_type: OrderType::Market,
                ..Default::default()
            },
        );

        let plan = ExecutionPlan::resolve(&config, &request);
        assert_eq!(plan.mode, ExecutionMode::LimitMarket);
        assert_eq!(plan.leg_a.venue, VenueId::new("alpha"));
    }

    #[test]
    fn test_limit_price_percentage() {
        let mode = OrderModeConfig::default();
        let buy = leg("alpha", OrderSide::Buy, dec!(100));
        let sell = leg("beta", OrderSide::Sell, dec!(100));

        assert_eq!(limit_price(&buy, &mode), Price::new(dec!(100.1)));
        assert_eq!(limit_price(&sell, &mode), Price::new(dec!(99.9)));

        let ticked = OrderModeConfig {
            tick_size: Some(Price::new(dec!(0.5))),
            ..Default::default()
        };
        assert_eq!(limit_price(&buy, &ticked), Price::new(dec!(100)));
        assert_eq!(limit_price(&sell, &ticked), Price::new(dec!(100)));
    }

    #[test]
    fn test_limit_price_tick_precision() {
        let mode = OrderModeConfig {
            use_tick_precision: true,
            ..Default::default()
        };
        let buy = leg("alpha", OrderSide::Buy, dec!(101.25));
        let sell = leg("beta", OrderSide::Sell, dec!(3000));

        assert_eq!(limit_price(&buy, &mode), Price::new(dec!(101.24)));
        assert_eq!(limit_price(&sell, &mode), Price::new(dec!(3001)));
    }

    #[test]
    fn test_absolute_offset_wins() {
        let mode = OrderModeConfig {
            use_tick_precision: true,
            ..Default::default()
        };
        let buy = leg("alpha", OrderSide::Buy, dec!(100)).with_price_offset(Price::new(dec!(0.5)));
        let sell = leg("beta", OrderSide::Sell, dec!(0.3)).with_price_offset(Price::new(dec!(0.5)));

        assert_eq!(limit_price(&buy, &mode), Price::new(dec!(100.5)));
        // Offset larger than the price falls back to the target.
        assert_eq!(limit_price(&sell, &mode), Price::new(dec!(0.3)));
    }
}
