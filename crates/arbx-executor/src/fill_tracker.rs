//! Fill tracking.
//!
//! Turns the unreliable mix of submission responses, push updates and pull
//! queries into one awaitable per order:
//!
//! - Every order has one slot (`watch` channel) indexed under each id it is
//!   known by, so a push keyed by either the venue order id or the client
//!   order id reaches the same waiter.
//! - Pushes that arrive before the order is acknowledged (or even registered)
//!   are cached in a slot and satisfy the waiter immediately.
//! - Keys of resolved orders are remembered for a while, so duplicate pushes
//!   are absorbed silently instead of re-creating slots.
//! - On push timeout, market orders are confirmed by query or history scan;
//!   limit orders are canceled first and then re-queried.
//! - Without push, the order is polled until terminal or timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbx_core::{
    InstrumentId, OrderHandle, OrderIdentity, OrderKey, OrderSnapshot, OrderStatus, Size, VenueId,
};
use arbx_telemetry::Metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{VenueError, VenueResult};
use crate::sequencer::OrderSequencer;
use crate::venue::{DynVenue, OrderUpdateCallback};

/// Orders scanned when confirming a market order from history.
pub const HISTORY_SCAN_LIMIT: usize = 50;

/// How long resolved keys absorb duplicate pushes, and how long an unclaimed
/// early push is kept.
const RESOLVED_TTL: Duration = Duration::from_secs(600);

/// Result of waiting for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Confirmed fill (possibly partial).
    Filled(Size),
    /// Confirmed no fill: canceled, rejected or timed out and canceled.
    NotFilled,
    /// A market order whose fill could not be confirmed either way.
    Unresolved,
}

impl FillOutcome {
    /// Confirmed filled quantity; zero unless `Filled`.
    #[must_use]
    pub fn filled(&self) -> Size {
        match self {
            Self::Filled(q) => *q,
            Self::NotFilled | Self::Unresolved => Size::ZERO,
        }
    }
}

/// Where a wait was resolved. Used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Ack,
    Push,
    Pull,
    History,
    Poll,
    Cancel,
    Timeout,
}

impl Source {
    fn label(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Push => "push",
            Self::Pull => "pull",
            Self::History => "history",
            Self::Poll => "poll",
            Self::Cancel => "cancel",
            Self::Timeout => "timeout",
        }
    }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SlotView {
    /// Everything learned so far, merged monotonically.
    snapshot: Option<OrderSnapshot>,
    /// A "filled" report carried no quantity.
    anomaly: bool,
    updates: u64,
}

impl SlotView {
    fn absorb(&mut self, snapshot: &OrderSnapshot) {
        match &mut self.snapshot {
            Some(current) => current.absorb(snapshot),
            None => self.snapshot = Some(snapshot.clone()),
        }
        self.updates += 1;
    }

    fn is_settled(&self) -> bool {
        self.anomaly || self.snapshot.as_ref().is_some_and(OrderSnapshot::is_terminal)
    }
}

#[derive(Debug)]
struct OrderSlot {
    tx: watch::Sender<SlotView>,
    registered: AtomicBool,
    created: Instant,
}

impl OrderSlot {
    fn new(registered: bool) -> Arc<Self> {
        let (tx, _rx) = watch::channel(SlotView::default());
        Arc::new(Self {
            tx,
            registered: AtomicBool::new(registered),
            created: Instant::now(),
        })
    }

    fn view(&self) -> SlotView {
        self.tx.borrow().clone()
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn ingest(&self, snapshot: &OrderSnapshot, anomaly: bool) {
        self.tx.send_modify(|view| {
            view.absorb(snapshot);
            view.anomaly |= anomaly;
        });
    }
}

type SlotKey = (VenueId, OrderKey);

#[derive(Debug)]
struct TrackerInner {
    slots: DashMap<SlotKey, Arc<OrderSlot>>,
    resolved: DashMap<SlotKey, Instant>,
    /// Serializes slot lookup and re-indexing across keys.
    index_lock: Mutex<()>,
    poll_interval: Duration,
    sequencer: Arc<OrderSequencer>,
}

/// Strip a "filled" status that carries no quantity.
///
/// Returns the cleaned snapshot and whether the report was anomalous.
fn sanitize(venue: &VenueId, mut snapshot: OrderSnapshot) -> (OrderSnapshot, bool) {
    let anomaly =
        snapshot.status == Some(OrderStatus::Filled) && snapshot.filled_or_zero().is_zero();
    if anomaly {
        warn!(
            venue = %venue,
            order = %snapshot.identity,
            "Venue reported filled with zero quantity, treating as unfilled"
        );
        Metrics::fill_anomaly(venue.as_str(), "filled_zero_quantity");
        snapshot.status = None;
    }
    (snapshot, anomaly)
}

// ============================================================================
// FillTracker
// ============================================================================

/// Per-order fill awaiting across push and pull.
#[derive(Debug, Clone)]
pub struct FillTracker {
    inner: Arc<TrackerInner>,
}

impl FillTracker {
    #[must_use]
    pub fn new(poll_interval: Duration, sequencer: Arc<OrderSequencer>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                slots: DashMap::new(),
                resolved: DashMap::new(),
                index_lock: Mutex::new(()),
                poll_interval,
                sequencer,
            }),
        }
    }

    /// Subscribe to the adapter's push channel.
    ///
    /// Returns false when the venue has no push channel.
    pub fn install(&self, adapter: &DynVenue) -> VenueResult<bool> {
        let tracker = self.clone();
        let venue = adapter.venue().clone();
        let callback: OrderUpdateCallback = Arc::new(move |snapshot: OrderSnapshot| {
            tracker.on_order_update(&venue, snapshot);
        });
        match adapter.subscribe_order_updates(callback) {
            Ok(()) => Ok(true),
            Err(VenueError::Unsupported(_)) => {
                info!(venue = %adapter.venue(), "No push channel, fills will be polled");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Handle one push update. Never blocks.
    pub fn on_order_update(&self, venue: &VenueId, snapshot: OrderSnapshot) {
        let keys = snapshot.identity.keys();
        if keys.is_empty() {
            Metrics::push_update(venue.as_str(), "untracked");
            return;
        }
        if keys
            .iter()
            .any(|k| self.inner.resolved.contains_key(&(venue.clone(), k.clone())))
        {
            debug!(venue = %venue, order = %snapshot.identity, "Duplicate push absorbed");
            Metrics::push_update(venue.as_str(), "duplicate");
            return;
        }

        let (snapshot, anomaly) = sanitize(venue, snapshot);
        let slot = self.attach(venue, &keys, false, Some((&snapshot, anomaly)));

        let disposition = if slot.is_registered() {
            "matched"
        } else {
            "early"
        };
        debug!(
            venue = %venue,
            order = %snapshot.identity,
            status = ?snapshot.status,
            filled = ?snapshot.filled,
            disposition,
            "Order update"
        );
        Metrics::push_update(venue.as_str(), disposition);
    }

    /// Register an order before it is submitted.
    pub fn register(&self, handle: &OrderHandle) {
        self.attach(&handle.venue, &handle.identity.keys(), true, None);
    }

    /// Apply the submission response and index any id it revealed.
    pub fn acknowledge(&self, handle: &mut OrderHandle, ack: &OrderSnapshot) {
        let (ack, anomaly) = sanitize(&handle.venue, ack.clone());
        handle.merge(&ack);

        let keys = handle.identity.keys();
        self.attach(&handle.venue, &keys, true, Some((&ack, anomaly)));
    }

    /// Drop an order from the pending index and remember its keys.
    pub fn forget(&self, venue: &VenueId, identity: &OrderIdentity) {
        let mut keys = identity.keys();
        if let Some(slot) = self.find_slot(venue, &keys) {
            if let Some(snapshot) = slot.view().snapshot {
                for key in snapshot.identity.keys() {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
        }

        let now = Instant::now();
        for key in keys {
            let slot_key = (venue.clone(), key);
            self.inner.slots.remove(&slot_key);
            self.inner.resolved.insert(slot_key, now);
        }
        self.inner
            .resolved
            .retain(|_, at| now.saturating_duration_since(*at) < RESOLVED_TTL);
    }

    /// Number of keys in the pending index.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Wait until the order is terminal, or resolve it after `timeout`.
    ///
    /// Market and limit orders differ only after a timeout; the order type
    /// comes from the handle. The handle is updated with everything learned.
    pub async fn await_fill(
        &self,
        handle: &mut OrderHandle,
        adapter: &DynVenue,
        timeout: Duration,
    ) -> FillOutcome {
        let started = Instant::now();
        let mut guard = CancelOnDrop::arm(self.clone(), Arc::clone(adapter), handle);

        let (outcome, source) = self.resolve(handle, adapter, timeout).await;

        guard.disarm();
        self.forget(&handle.venue, &handle.identity);

        let elapsed = started.elapsed();
        Metrics::fill_wait(
            handle.venue.as_str(),
            source.label(),
            elapsed.as_secs_f64() * 1000.0,
        );
        debug!(
            venue = %handle.venue,
            order = %handle.identity,
            order_type = %handle.order_type,
            outcome = ?outcome,
            source = source.label(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Fill wait finished"
        );
        outcome
    }

    async fn resolve(
        &self,
        handle: &mut OrderHandle,
        adapter: &DynVenue,
        timeout: Duration,
    ) -> (FillOutcome, Source) {
        let slot = self.attach(&handle.venue, &handle.identity.keys(), true, None);
        let view = slot.view();
        if let Some(snapshot) = &view.snapshot {
            handle.merge(snapshot);
        }
        if view.anomaly {
            return self.on_anomaly(handle, adapter).await;
        }
        if handle.is_terminal() {
            return (settled(handle), Source::Ack);
        }

        if !adapter.push_connected() {
            return self.poll(handle, adapter, timeout).await;
        }

        let mut rx = slot.tx.subscribe();
        let resolved = tokio::time::timeout(timeout, async move {
            rx.wait_for(SlotView::is_settled).await.is_ok()
        })
        .await
        .unwrap_or(false);

        let view = slot.view();
        if let Some(snapshot) = &view.snapshot {
            handle.merge(snapshot);
        }
        if view.anomaly {
            return self.on_anomaly(handle, adapter).await;
        }
        if resolved && handle.is_terminal() {
            return (settled(handle), Source::Push);
        }
        self.on_timeout(handle, adapter).await
    }

    async fn poll(
        &self,
        handle: &mut OrderHandle,
        adapter: &DynVenue,
        timeout: Duration,
    ) -> (FillOutcome, Source) {
        let deadline = Instant::now() + timeout;
        if !adapter.supports_order_query() {
            warn!(
                venue = %handle.venue,
                order = %handle.identity,
                "Venue has neither push nor order query, cannot track fill"
            );
            tokio::time::sleep_until(deadline).await;
            return self.on_timeout(handle, adapter).await;
        }

        loop {
            self.pull(handle, adapter).await;
            if handle.is_terminal() {
                return (settled(handle), Source::Poll);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.inner.poll_interval.min(deadline - now)).await;
        }
        self.on_timeout(handle, adapter).await
    }

    async fn on_timeout(
        &self,
        handle: &mut OrderHandle,
        adapter: &DynVenue,
    ) -> (FillOutcome, Source) {
        if !handle.order_type.is_market() {
            return (self.cancel_and_confirm(handle, adapter).await, Source::Cancel);
        }

        let mut source = Source::Timeout;
        if self.pull(handle, adapter).await {
            source = Source::Pull;
        } else if self.scan_history(handle, adapter).await {
            source = Source::History;
        }

        if handle.is_terminal() {
            return (settled(handle), source);
        }
        if handle.filled.is_positive() {
            info!(
                venue = %handle.venue,
                order = %handle.identity,
                filled = %handle.filled,
                requested = %handle.requested,
                "Market order timed out with partial progress"
            );
            return (FillOutcome::Filled(handle.filled), source);
        }
        warn!(
            venue = %handle.venue,
            order = %handle.identity,
            instrument = %handle.instrument,
            "Market order fill unconfirmed after timeout"
        );
        (FillOutcome::Unresolved, source)
    }

    async fn on_anomaly(
        &self,
        handle: &mut OrderHandle,
        adapter: &DynVenue,
    ) -> (FillOutcome, Source) {
        if handle.order_type.is_market() {
            (FillOutcome::NotFilled, Source::Push)
        } else {
            (self.cancel_and_confirm(handle, adapter).await, Source::Cancel)
        }
    }

    /// Cancel a limit order, then query its final state.
    async fn cancel_and_confirm(&self, handle: &mut OrderHandle, adapter: &DynVenue) -> FillOutcome {
        let cancel = {
            let _seq = self.inner.sequencer.acquire(&handle.venue).await;
            adapter
                .cancel_order(handle.identity.clone(), handle.instrument.clone())
                .await
        };

        match cancel {
            Ok(()) => {
                self.pull(handle, adapter).await;
                if !handle.is_terminal() {
                    handle.merge(
                        &OrderSnapshot::new(handle.identity.clone())
                            .with_status(OrderStatus::Canceled),
                    );
                }
                debug!(
                    venue = %handle.venue,
                    order = %handle.identity,
                    filled = %handle.filled,
                    "Limit order canceled after timeout"
                );
            }
            Err(e) => {
                warn!(
                    venue = %handle.venue,
                    order = %handle.identity,
                    error = %e,
                    "Cancel after timeout failed, querying final state"
                );
                self.pull(handle, adapter).await;
                if !handle.is_terminal() {
                    warn!(
                        venue = %handle.venue,
                        order = %handle.identity,
                        "Limit order may still be resting"
                    );
                }
            }
        }

        if handle.filled.is_positive() {
            FillOutcome::Filled(handle.filled)
        } else {
            FillOutcome::NotFilled
        }
    }

    /// One `get_order`. Returns true if the venue returned the order.
    async fn pull(&self, handle: &mut OrderHandle, adapter: &DynVenue) -> bool {
        if !adapter.supports_order_query() {
            return false;
        }
        match adapter
            .get_order(handle.identity.clone(), handle.instrument.clone())
            .await
        {
            Ok(Some(snapshot)) => {
                apply_pull(handle, &snapshot);
                true
            }
            Ok(None) => {
                debug!(venue = %handle.venue, order = %handle.identity, "Order query found nothing");
                false
            }
            Err(e) => {
                warn!(
                    venue = %handle.venue,
                    order = %handle.identity,
                    error = %e,
                    "Order query failed"
                );
                false
            }
        }
    }

    /// Look the order up in recent history. Returns true if found.
    async fn scan_history(&self, handle: &mut OrderHandle, adapter: &DynVenue) -> bool {
        if !adapter.supports_order_history() {
            return false;
        }
        match adapter
            .get_order_history(handle.instrument.clone(), HISTORY_SCAN_LIMIT)
            .await
        {
            Ok(history) => match history
                .into_iter()
                .find(|s| s.identity.matches(&handle.identity))
            {
                Some(snapshot) => {
                    apply_pull(handle, &snapshot);
                    true
                }
                None => false,
            },
            Err(e) => {
                warn!(venue = %handle.venue, error = %e, "Order history scan failed");
                false
            }
        }
    }

    fn find_slot(&self, venue: &VenueId, keys: &[OrderKey]) -> Option<Arc<OrderSlot>> {
        keys.iter().find_map(|key| {
            self.inner
                .slots
                .get(&(venue.clone(), key.clone()))
                .map(|slot| Arc::clone(slot.value()))
        })
    }

    /// Find or create the one slot for `keys` and apply `update` to it.
    ///
    /// When the keys lead to more than one slot (an order first seen under
    /// one id, then under the other), the slots are merged: the survivor is
    /// the one a waiter is subscribed to, else a registered one. The others
    /// fold their state into it and every key that pointed at them is
    /// re-pointed.
    fn attach(
        &self,
        venue: &VenueId,
        keys: &[OrderKey],
        register: bool,
        update: Option<(&OrderSnapshot, bool)>,
    ) -> Arc<OrderSlot> {
        let _index = self.inner.index_lock.lock();

        let mut found: Vec<Arc<OrderSlot>> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = self.inner.slots.get(&(venue.clone(), key.clone())) {
                if !found.iter().any(|s| Arc::ptr_eq(s, slot.value())) {
                    found.push(Arc::clone(slot.value()));
                }
            }
        }

        let survivor = found
            .iter()
            .position(|s| s.tx.receiver_count() > 0)
            .or_else(|| found.iter().position(|s| s.is_registered()))
            .or_else(|| (!found.is_empty()).then_some(0));
        let slot = match survivor {
            Some(i) => found.swap_remove(i),
            None => {
                if !register {
                    self.prune_unclaimed();
                }
                OrderSlot::new(register)
            }
        };
        if register {
            slot.registered.store(true, Ordering::Release);
        }

        for other in &found {
            let view = other.view();
            if let Some(snapshot) = &view.snapshot {
                slot.ingest(snapshot, view.anomaly);
            }
            for mut entry in self.inner.slots.iter_mut() {
                if Arc::ptr_eq(entry.value(), other) {
                    *entry.value_mut() = Arc::clone(&slot);
                }
            }
            debug!(venue = %venue, "Merged order slots");
        }
        if let Some((snapshot, anomaly)) = update {
            slot.ingest(snapshot, anomaly);
        }
        for key in keys {
            self.inner
                .slots
                .insert((venue.clone(), key.clone()), Arc::clone(&slot));
        }
        slot
    }

    fn prune_unclaimed(&self) {
        self.inner.slots.retain(|_, slot| {
            slot.is_registered() || slot.created.elapsed() < RESOLVED_TTL
        });
    }
}

/// Merge a query response.
///
/// A limit order reported filled with the quantity field missing is taken as
/// fully filled. An explicit zero quantity is an anomaly and never inferred.
fn apply_pull(handle: &mut OrderHandle, snapshot: &OrderSnapshot) {
    if snapshot.status != Some(OrderStatus::Filled) {
        handle.merge(snapshot);
        return;
    }
    match snapshot.filled {
        None => {
            handle.merge(snapshot);
            if !handle.order_type.is_market() && handle.filled.is_zero() {
                info!(
                    venue = %handle.venue,
                    order = %handle.identity,
                    requested = %handle.requested,
                    "Limit order closed as filled without quantity, assuming full fill"
                );
                handle.filled = handle.requested;
            }
        }
        Some(_) => {
            let (snapshot, _) = sanitize(&handle.venue, snapshot.clone());
            handle.merge(&snapshot);
        }
    }
}

/// Outcome of a handle that reached a terminal status.
fn settled(handle: &OrderHandle) -> FillOutcome {
    if handle.filled.is_positive() {
        FillOutcome::Filled(handle.filled)
    } else if handle.status == OrderStatus::Filled && handle.order_type.is_market() {
        warn!(
            venue = %handle.venue,
            order = %handle.identity,
            "Market order closed as filled without quantity"
        );
        FillOutcome::Unresolved
    } else {
        FillOutcome::NotFilled
    }
}

// ============================================================================
// CancelOnDrop
// ============================================================================

/// Issues a best-effort cancel if a fill wait is dropped mid-flight.
struct CancelOnDrop {
    armed: Option<(FillTracker, DynVenue, VenueId, OrderIdentity, InstrumentId)>,
}

impl CancelOnDrop {
    fn arm(tracker: FillTracker, adapter: DynVenue, handle: &OrderHandle) -> Self {
        Self {
            armed: Some((
                tracker,
                adapter,
                handle.venue.clone(),
                handle.identity.clone(),
                handle.instrument.clone(),
            )),
        }
    }

    fn disarm(&mut self) {
        self.armed = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some((tracker, adapter, venue, identity, instrument)) = self.armed.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracker.forget(&venue, &identity);
            return;
        };
        runtime.spawn(async move {
            warn!(venue = %venue, order = %identity, "Fill wait dropped, canceling order");
            let result = {
                let _seq = tracker.inner.sequencer.acquire(&venue).await;
                adapter.cancel_order(identity.clone(), instrument).await
            };
            if let Err(e) = result {
                warn!(venue = %venue, order = %identity, error = %e, "Cancel on drop failed");
            }
            tracker.forget(&venue, &identity);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{FillPlan, PaperVenue};
    use crate::venue::{NewOrder, VenueAdapter};
    use arbx_core::{ClientOrderId, OrderSide, OrderType, Price, VenueOrderId};
    use rust_decimal_macros::dec;

    struct Harness {
        paper: Arc<PaperVenue>,
        adapter: DynVenue,
        tracker: FillTracker,
    }

    impl Harness {
        fn new(paper: PaperVenue) -> Self {
            let paper = Arc::new(paper);
            let adapter: DynVenue = paper.clone();
            let tracker = FillTracker::new(
                Duration::from_millis(200),
                Arc::new(OrderSequencer::default()),
            );
            tracker.install(&adapter).unwrap();
            Self {
                paper,
                adapter,
                tracker,
            }
        }

        async fn submit(&self, order_type: OrderType, plan: FillPlan) -> OrderHandle {
            self.paper.enqueue(plan);
            let cloid = ClientOrderId::new();
            let price = (order_type == OrderType::Limit).then(|| Price::new(dec!(100)));
            let mut handle = OrderHandle::new(
                OrderIdentity::from_client(cloid.clone()),
                self.paper.venue().clone(),
                InstrumentId::new("ETH"),
                OrderSide::Buy,
                order_type,
                Size::ONE,
                price,
                false,
            );
            self.tracker.register(&handle);
            let ack = self
                .paper
                .create_order(NewOrder {
                    instrument: InstrumentId::new("ETH"),
                    side: OrderSide::Buy,
                    order_type,
                    quantity: Size::ONE,
                    price,
                    client_order_id: cloid,
                    reduce_only: false,
                    slippage_tolerance: None,
                })
                .await
                .unwrap();
            self.tracker.acknowledge(&mut handle, &ack);
            handle
        }
    }

    fn venue_id(handle: &OrderHandle) -> String {
        handle
            .identity
            .venue_order_id
            .as_ref()
            .map(|v| v.as_str().to_string())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_from_submission() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Market, FillPlan::Fill).await;

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
        assert_eq!(handle.status, OrderStatus::Filled);
        assert_eq!(h.tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_resolves_waiter() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h
            .submit(OrderType::Limit, FillPlan::FillAfter(Duration::from_secs(2)))
            .await;

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(10))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
        assert!(h.paper.cancels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_push_before_registration() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let cloid = ClientOrderId::from_string("early-1");
        let identity = OrderIdentity::new(Some(VenueOrderId::new("v-9")), Some(cloid.clone()));

        // Fill arrives before the engine has even registered the order.
        h.tracker.on_order_update(
            &VenueId::new("alpha"),
            OrderSnapshot::new(identity)
                .with_status(OrderStatus::Filled)
                .with_filled(Size::new(dec!(0.7))),
        );

        let mut handle = OrderHandle::new(
            OrderIdentity::from_client(cloid),
            VenueId::new("alpha"),
            InstrumentId::new("ETH"),
            OrderSide::Sell,
            OrderType::Market,
            Size::ONE,
            None,
            false,
        );
        h.tracker.register(&handle);

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::new(dec!(0.7))));
        assert_eq!(
            handle.identity.venue_order_id,
            Some(VenueOrderId::new("v-9"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_under_venue_id_first_still_reaches_waiter() {
        let paper = PaperVenue::new("alpha");
        paper.set_query_supported(false);
        let h = Harness::new(paper);
        let venue = VenueId::new("alpha");
        let cloid = ClientOrderId::from_string("split-1");

        let mut handle = OrderHandle::new(
            OrderIdentity::from_client(cloid.clone()),
            venue.clone(),
            InstrumentId::new("ETH"),
            OrderSide::Buy,
            OrderType::Market,
            Size::ONE,
            None,
            false,
        );
        h.tracker.register(&handle);
        // The submission response only echoes the client id.
        h.tracker.acknowledge(
            &mut handle,
            &OrderSnapshot::new(OrderIdentity::from_client(cloid.clone()))
                .with_status(OrderStatus::Open),
        );

        let tracker = h.tracker.clone();
        let pushes = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tracker.on_order_update(
                &venue,
                OrderSnapshot::new(OrderIdentity::from_venue(VenueOrderId::new("v-1")))
                    .with_status(OrderStatus::Open),
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
            tracker.on_order_update(
                &venue,
                OrderSnapshot::new(OrderIdentity::new(
                    Some(VenueOrderId::new("v-1")),
                    Some(cloid),
                ))
                .with_status(OrderStatus::Filled)
                .with_filled(Size::ONE),
            );
        });

        let started = Instant::now();
        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(5))
            .await;
        pushes.await.unwrap();

        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            handle.identity.venue_order_id,
            Some(VenueOrderId::new("v-1"))
        );
        assert_eq!(h.tracker.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merged_slots_share_later_updates() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let venue = VenueId::new("alpha");
        let cloid = ClientOrderId::from_string("split-2");
        let voi = VenueOrderId::new("v-2");

        h.tracker.on_order_update(
            &venue,
            OrderSnapshot::new(OrderIdentity::from_venue(voi.clone()))
                .with_status(OrderStatus::Open),
        );
        h.tracker.on_order_update(
            &venue,
            OrderSnapshot::new(OrderIdentity::from_client(cloid.clone()))
                .with_filled(Size::new(dec!(0.2))),
        );
        h.tracker.on_order_update(
            &venue,
            OrderSnapshot::new(OrderIdentity::new(Some(voi.clone()), Some(cloid.clone())))
                .with_status(OrderStatus::PartiallyFilled),
        );

        let by_venue = h
            .tracker
            .find_slot(&venue, &[OrderKey::Venue(voi)])
            .unwrap();
        let by_client = h
            .tracker
            .find_slot(&venue, &[OrderKey::Client(cloid)])
            .unwrap();
        assert!(Arc::ptr_eq(&by_venue, &by_client));
        let view = by_venue.view();
        assert_eq!(view.updates, 3);
        assert_eq!(
            view.snapshot.unwrap().filled,
            Some(Size::new(dec!(0.2)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_duplicate_after_resolution_is_absorbed() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Market, FillPlan::Fill).await;
        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
        let keys = handle.identity.keys();
        assert_eq!(keys.len(), 2);

        // Late replay disagreeing with the resolved state.
        h.tracker.on_order_update(
            &handle.venue,
            OrderSnapshot::new(handle.identity.clone())
                .with_status(OrderStatus::Canceled)
                .with_filled(Size::new(dec!(0.3))),
        );
        assert_eq!(h.tracker.pending_len(), 0);
        assert!(h.tracker.find_slot(&handle.venue, &keys).is_none());

        // A new wait under the same ids starts from a clean slot.
        h.tracker.register(&handle);
        let slot = h.tracker.find_slot(&handle.venue, &keys).unwrap();
        let view = slot.view();
        assert!(view.snapshot.is_none());
        assert_eq!(view.updates, 0);
        assert!(!view.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_timeout_cancels_then_reports_nothing() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Limit, FillPlan::Rest).await;

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, FillOutcome::NotFilled);
        assert_eq!(h.paper.cancels().len(), 1);
        assert_eq!(handle.status, OrderStatus::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_timeout_reports_partial_progress() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h
            .submit(OrderType::Limit, FillPlan::Partial(Size::new(dec!(0.4))))
            .await;

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::new(dec!(0.4))));
        assert_eq!(handle.remaining(), Size::new(dec!(0.6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_failure_falls_back_to_query() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Limit, FillPlan::Rest).await;
        h.paper
            .set_order_state(&venue_id(&handle), OrderStatus::Filled, Size::ONE);
        h.paper
            .fail_next_cancel(VenueError::Network("connection reset".into()));

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_timeout_confirms_by_query() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Market, FillPlan::Rest).await;
        // Filled on the venue, but the push never came.
        h.paper
            .set_order_state(&venue_id(&handle), OrderStatus::Filled, Size::ONE);

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
        assert!(h.paper.cancels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_timeout_confirms_by_history() {
        let paper = PaperVenue::new("alpha");
        paper.set_query_supported(false);
        paper.set_history_supported(true);
        let h = Harness::new(paper);
        let mut handle = h.submit(OrderType::Market, FillPlan::Rest).await;
        h.paper.set_order_state(
            &venue_id(&handle),
            OrderStatus::Filled,
            Size::new(dec!(0.5)),
        );

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::new(dec!(0.5))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_unconfirmed_is_unresolved() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Market, FillPlan::Rest).await;

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, FillOutcome::Unresolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_quantity_filled_push() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut limit = h.submit(OrderType::Limit, FillPlan::Rest).await;
        h.paper.emit(
            OrderSnapshot::new(limit.identity.clone())
                .with_status(OrderStatus::Filled)
                .with_filled(Size::ZERO),
        );

        let outcome = h
            .tracker
            .await_fill(&mut limit, &h.adapter, Duration::from_secs(30))
            .await;
        // Pull-confirmed: the venue still shows the order unfilled.
        assert_eq!(outcome, FillOutcome::NotFilled);
        assert_eq!(h.paper.cancels().len(), 1);

        let mut market = h.submit(OrderType::Market, FillPlan::Rest).await;
        h.paper.emit(
            OrderSnapshot::new(market.identity.clone()).with_status(OrderStatus::Filled),
        );
        let outcome = h
            .tracker
            .await_fill(&mut market, &h.adapter, Duration::from_secs(30))
            .await;
        assert_eq!(outcome, FillOutcome::NotFilled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_missing_quantity_inferred_for_limit_only() {
        let paper = PaperVenue::pull_only("alpha");
        paper.set_hide_fill_on_query(true);
        let h = Harness::new(paper);

        let mut limit = h.submit(OrderType::Limit, FillPlan::Rest).await;
        h.paper
            .set_order_state(&venue_id(&limit), OrderStatus::Filled, Size::ONE);
        let outcome = h
            .tracker
            .await_fill(&mut limit, &h.adapter, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));

        let mut market = h.submit(OrderType::Market, FillPlan::Rest).await;
        h.paper
            .set_order_state(&venue_id(&market), OrderStatus::Filled, Size::ONE);
        let outcome = h
            .tracker
            .await_fill(&mut market, &h.adapter, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, FillOutcome::Unresolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_explicit_zero_quantity_is_not_inferred() {
        let h = Harness::new(PaperVenue::pull_only("alpha"));

        let mut limit = h.submit(OrderType::Limit, FillPlan::Rest).await;
        h.paper
            .set_order_state(&venue_id(&limit), OrderStatus::Filled, Size::ZERO);
        let outcome = h
            .tracker
            .await_fill(&mut limit, &h.adapter, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, FillOutcome::NotFilled);
        assert!(limit.filled.is_zero());
        assert_eq!(h.paper.cancels().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_without_push() {
        let h = Harness::new(PaperVenue::pull_only("alpha"));
        let mut handle = h
            .submit(OrderType::Limit, FillPlan::FillAfter(Duration::from_secs(3)))
            .await;

        let outcome = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(10))
            .await;
        assert_eq!(outcome, FillOutcome::Filled(Size::ONE));
        assert!(h.paper.cancels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_cancels_order() {
        let h = Harness::new(PaperVenue::new("alpha"));
        let mut handle = h.submit(OrderType::Limit, FillPlan::Rest).await;

        let wait = h
            .tracker
            .await_fill(&mut handle, &h.adapter, Duration::from_secs(60));
        let _ = tokio::time::timeout(Duration::from_millis(100), wait).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.paper.cancels().len(), 1);
        assert_eq!(h.tracker.pending_len(), 0);
    }
}
