//! Order placement with retry.
//!
//! Every order the engine sends goes through [`OrderPlacer::place`]: register
//! with the fill tracker, take the venue's ordering lock, submit, and retry
//! throttling and transient failures with the same client order id.

use std::sync::Arc;

use arbx_core::{OrderHandle, OrderIdentity};
use arbx_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::error::{VenueError, VenueResult};
use crate::fill_tracker::FillTracker;
use crate::rate_limiter::RateLimiterRegistry;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sequencer::OrderSequencer;
use crate::venue::{DynVenue, NewOrder};

/// Submits orders with bounded retries.
#[derive(Debug, Clone)]
pub struct OrderPlacer {
    tracker: FillTracker,
    limiters: Arc<RateLimiterRegistry>,
    sequencer: Arc<OrderSequencer>,
    retry: RetryPolicy,
}

impl OrderPlacer {
    #[must_use]
    pub fn new(
        tracker: FillTracker,
        limiters: Arc<RateLimiterRegistry>,
        sequencer: Arc<OrderSequencer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tracker,
            limiters,
            sequencer,
            retry,
        }
    }

    /// Submit an order and return its acknowledged handle.
    ///
    /// The caller must hold the venue's rate limit lease.
    pub async fn place(&self, adapter: &DynVenue, order: NewOrder) -> VenueResult<OrderHandle> {
        let venue = adapter.venue().clone();
        let order_type = order.order_type.to_string();
        let mut handle = OrderHandle::new(
            OrderIdentity::from_client(order.client_order_id.clone()),
            venue.clone(),
            order.instrument.clone(),
            order.side,
            order.order_type,
            order.quantity,
            order.price,
            order.reduce_only,
        );
        self.tracker.register(&handle);

        let mut attempt = 1;
        loop {
            let submitted = {
                let _seq = self.sequencer.acquire(&venue).await;
                adapter.create_order(order.clone()).await
            };

            let error = match submitted {
                Ok(ack) => {
                    self.tracker.acknowledge(&mut handle, &ack);
                    Metrics::leg_order(venue.as_str(), &order_type, "accepted");
                    debug!(
                        venue = %venue,
                        order = %handle.identity,
                        side = %handle.side,
                        order_type = %order_type,
                        quantity = %handle.requested,
                        price = ?handle.price,
                        reduce_only = handle.reduce_only,
                        attempt,
                        "Order accepted"
                    );
                    return Ok(handle);
                }
                Err(VenueError::DuplicateClientId(message)) => {
                    if self.recover_duplicate(adapter, &mut handle).await {
                        Metrics::leg_order(venue.as_str(), &order_type, "accepted");
                        return Ok(handle);
                    }
                    VenueError::DuplicateClientId(message)
                }
                Err(e) => e,
            };

            match self.retry.decide(attempt, &error) {
                RetryDecision::Cooldown(hint) => {
                    let limiter = self.limiters.limiter(&venue);
                    limiter.register_cooldown(hint);
                    Metrics::order_retry(venue.as_str(), "rate_limited");
                    warn!(
                        venue = %venue,
                        attempt,
                        error = %error,
                        "Order throttled, retrying after cooldown"
                    );
                    tokio::time::sleep(limiter.cooldown_remaining()).await;
                }
                RetryDecision::Backoff(delay) => {
                    Metrics::order_retry(venue.as_str(), "transient");
                    warn!(
                        venue = %venue,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Order submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    self.tracker.forget(&venue, &handle.identity);
                    Metrics::leg_order(venue.as_str(), &order_type, error.label());
                    warn!(
                        venue = %venue,
                        instrument = %handle.instrument,
                        side = %handle.side,
                        attempt,
                        error = %error,
                        "Order submission failed"
                    );
                    return Err(error);
                }
            }
            attempt += 1;
        }
    }

    /// A retry hit an order an earlier attempt already placed. Look it up by
    /// client order id and adopt it.
    async fn recover_duplicate(&self, adapter: &DynVenue, handle: &mut OrderHandle) -> bool {
        let Some(cloid) = handle.identity.client_order_id.clone() else {
            return false;
        };
        match adapter
            .get_order(OrderIdentity::from_client(cloid), handle.instrument.clone())
            .await
        {
            Ok(Some(snapshot)) => {
                info!(
                    venue = %handle.venue,
                    order = %snapshot.identity,
                    "Recovered order placed by an earlier attempt"
                );
                self.tracker.acknowledge(handle, &snapshot);
                true
            }
            Ok(None) => {
                warn!(
                    venue = %handle.venue,
                    order = %handle.identity,
                    "Duplicate client id but order not found"
                );
                false
            }
            Err(e) => {
                warn!(
                    venue = %handle.venue,
                    order = %handle.identity,
                    error = %e,
                    "Duplicate recovery query failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::paper::{FillPlan, PaperVenue};
    use arbx_core::{ClientOrderId, InstrumentId, OrderSide, OrderType, Size};
    use std::time::Duration;
    use tokio::time::Instant;

    fn setup(paper: Arc<PaperVenue>) -> (OrderPlacer, DynVenue) {
        let sequencer = Arc::new(OrderSequencer::default());
        let tracker = FillTracker::new(Duration::from_millis(200), Arc::clone(&sequencer));
        let adapter: DynVenue = paper;
        tracker.install(&adapter).unwrap();
        let limiters = Arc::new(RateLimiterRegistry::new(Arc::new(EngineConfig::default())));
        let placer = OrderPlacer::new(tracker, limiters, sequencer, RetryPolicy::default());
        (placer, adapter)
    }

    fn market_buy() -> NewOrder {
        NewOrder {
            instrument: InstrumentId::new("ETH"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: Size::ONE,
            price: None,
            client_order_id: ClientOrderId::new(),
            reduce_only: false,
            slippage_tolerance: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_with_same_client_id() {
        let paper = Arc::new(PaperVenue::new("alpha"));
        paper.enqueue(FillPlan::Fail(VenueError::Network("reset".into())));
        paper.enqueue(FillPlan::Fail(VenueError::Timeout("slow".into())));
        let (placer, adapter) = setup(Arc::clone(&paper));

        let start = Instant::now();
        let handle = placer.place(&adapter, market_buy()).await.unwrap();
        assert_eq!(handle.filled, Size::ONE);

        let submissions = paper.submissions();
        assert_eq!(submissions.len(), 3);
        assert!(submissions
            .iter()
            .all(|o| o.client_order_id == submissions[0].client_order_id));
        // 2s then 4s of backoff.
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_hint() {
        let paper = Arc::new(PaperVenue::new("alpha"));
        paper.enqueue(FillPlan::Fail(VenueError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(3)),
        }));
        let (placer, adapter) = setup(Arc::clone(&paper));

        let start = Instant::now();
        placer.place(&adapter, market_buy()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(paper.submissions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_and_reduce_only_surface_immediately() {
        let paper = Arc::new(PaperVenue::new("alpha"));
        paper.enqueue(FillPlan::Fail(VenueError::Rejected("insufficient margin".into())));
        let (placer, adapter) = setup(Arc::clone(&paper));

        let err = placer.place(&adapter, market_buy()).await.unwrap_err();
        assert!(matches!(err, VenueError::Rejected(_)));

        paper.set_openings_restricted(true);
        let err = placer.place(&adapter, market_buy()).await.unwrap_err();
        assert!(err.is_reduce_only());
        assert_eq!(paper.submissions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let paper = Arc::new(PaperVenue::new("alpha"));
        paper.set_default_plan(FillPlan::Fail(VenueError::Network("down".into())));
        let (placer, adapter) = setup(Arc::clone(&paper));

        let err = placer.place(&adapter, market_buy()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(paper.submissions().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_client_id_recovers_existing_order() {
        let paper = Arc::new(PaperVenue::new("alpha"));
        let (placer, adapter) = setup(Arc::clone(&paper));

        let order = market_buy();
        // First attempt landed but its response was lost.
        adapter.create_order(order.clone()).await.unwrap();

        let handle = placer.place(&adapter, order).await.unwrap();
        assert!(handle.identity.venue_order_id.is_some());
        assert_eq!(handle.filled, Size::ONE);
    }
}
