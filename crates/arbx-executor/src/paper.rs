//! In-memory paper venue.
//!
//! Simulates an exchange with scripted fill behavior: each submission consumes
//! the next [`FillPlan`] (falling back to a default plan), order state is kept
//! in memory, and every state change is pushed to subscribers while the push
//! channel is connected. Used by the runner for dry runs and by tests as the
//! venue double.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbx_core::{
    now_ms, InstrumentId, OrderIdentity, OrderSnapshot, OrderStatus, OrderType, Price, Size,
    VenueId, VenueOrderId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{VenueError, VenueResult};
use crate::venue::{BoxFuture, NewOrder, OrderUpdateCallback, VenueAdapter};

/// How the paper venue treats the next submitted order.
#[derive(Debug, Clone)]
pub enum FillPlan {
    /// Fill the whole quantity in the submission response.
    Fill,
    /// Fill this much immediately. Limit orders keep resting for the rest;
    /// market orders cancel the remainder.
    Partial(Size),
    /// Accept, then fill the whole quantity after the delay.
    FillAfter(Duration),
    /// Accept and rest without filling.
    Rest,
    /// Reject the submission.
    Fail(VenueError),
}

#[derive(Debug, Clone)]
struct PaperOrder {
    snapshot: OrderSnapshot,
    order_type: OrderType,
}

type Callbacks = Arc<Mutex<Vec<OrderUpdateCallback>>>;
type Orders = Arc<DashMap<String, PaperOrder>>;

/// Scripted in-memory venue.
pub struct PaperVenue {
    venue: VenueId,
    next_id: AtomicU64,
    plans: Mutex<VecDeque<FillPlan>>,
    default_plan: Mutex<FillPlan>,
    orders: Orders,
    client_index: DashMap<String, String>,
    submissions: Mutex<Vec<NewOrder>>,
    cancels: Mutex<Vec<OrderIdentity>>,
    cancel_failures: Mutex<VecDeque<VenueError>>,
    callbacks: Callbacks,
    mark_price: Mutex<Option<Price>>,
    push_supported: AtomicBool,
    push_connected: Arc<AtomicBool>,
    openings_restricted: AtomicBool,
    hide_fill_on_query: AtomicBool,
    query_supported: AtomicBool,
    history_supported: AtomicBool,
}

impl PaperVenue {
    /// Create a paper venue that fills everything and pushes updates.
    pub fn new(venue: impl Into<VenueId>) -> Self {
        Self {
            venue: venue.into(),
            next_id: AtomicU64::new(1),
            plans: Mutex::new(VecDeque::new()),
            default_plan: Mutex::new(FillPlan::Fill),
            orders: Arc::new(DashMap::new()),
            client_index: DashMap::new(),
            submissions: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            cancel_failures: Mutex::new(VecDeque::new()),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            mark_price: Mutex::new(None),
            push_supported: AtomicBool::new(true),
            push_connected: Arc::new(AtomicBool::new(true)),
            openings_restricted: AtomicBool::new(false),
            hide_fill_on_query: AtomicBool::new(false),
            query_supported: AtomicBool::new(true),
            history_supported: AtomicBool::new(false),
        }
    }

    /// Create a paper venue without a push channel (pull only).
    pub fn pull_only(venue: impl Into<VenueId>) -> Self {
        let paper = Self::new(venue);
        paper.push_supported.store(false, Ordering::SeqCst);
        paper.push_connected.store(false, Ordering::SeqCst);
        paper
    }

    // ------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------

    /// Queue a plan for the next submission.
    pub fn enqueue(&self, plan: FillPlan) {
        self.plans.lock().push_back(plan);
    }

    /// Plan used when the queue is empty.
    pub fn set_default_plan(&self, plan: FillPlan) {
        *self.default_plan.lock() = plan;
    }

    /// Fail the next cancel with `error`.
    pub fn fail_next_cancel(&self, error: VenueError) {
        self.cancel_failures.lock().push_back(error);
    }

    /// Reject non-reduce-only orders with a reduce-only restriction.
    pub fn set_openings_restricted(&self, restricted: bool) {
        self.openings_restricted.store(restricted, Ordering::SeqCst);
    }

    pub fn set_push_connected(&self, connected: bool) {
        self.push_connected.store(connected, Ordering::SeqCst);
    }

    /// Omit the filled quantity from query responses.
    pub fn set_hide_fill_on_query(&self, hide: bool) {
        self.hide_fill_on_query.store(hide, Ordering::SeqCst);
    }

    pub fn set_query_supported(&self, supported: bool) {
        self.query_supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_history_supported(&self, supported: bool) {
        self.history_supported.store(supported, Ordering::SeqCst);
    }

    /// Average fill price reported for market orders.
    pub fn set_mark_price(&self, price: Price) {
        *self.mark_price.lock() = Some(price);
    }

    /// Deliver an arbitrary update to subscribers, bypassing connection state.
    pub fn emit(&self, snapshot: OrderSnapshot) {
        emit_to(&self.callbacks, snapshot);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every `create_order` call, including rejected ones.
    pub fn submissions(&self) -> Vec<NewOrder> {
        self.submissions.lock().clone()
    }

    /// Every `cancel_order` call.
    pub fn cancels(&self) -> Vec<OrderIdentity> {
        self.cancels.lock().clone()
    }

    /// Current state of an accepted order by venue id.
    pub fn order(&self, venue_order_id: &str) -> Option<OrderSnapshot> {
        self.orders.get(venue_order_id).map(|o| o.snapshot.clone())
    }

    /// Force the stored state of an order (e.g. a fill the venue never pushed).
    pub fn set_order_state(&self, venue_order_id: &str, status: OrderStatus, filled: Size) {
        if let Some(mut order) = self.orders.get_mut(venue_order_id) {
            order.snapshot.status = Some(status);
            order.snapshot.filled = Some(filled);
            order.snapshot.updated_at = Some(now_ms());
        }
    }

    fn lookup(&self, id: &OrderIdentity) -> Option<String> {
        if let Some(oid) = &id.venue_order_id {
            if self.orders.contains_key(oid.as_str()) {
                return Some(oid.as_str().to_string());
            }
        }
        id.client_order_id
            .as_ref()
            .and_then(|c| self.client_index.get(c.as_str()).map(|v| v.clone()))
    }

    fn next_plan(&self) -> FillPlan {
        self.plans
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_plan.lock().clone())
    }

    fn push(&self, snapshot: OrderSnapshot) {
        if self.push_connected.load(Ordering::SeqCst) {
            emit_to(&self.callbacks, snapshot);
        }
    }

    fn accept(&self, order: &NewOrder, plan: &FillPlan) -> OrderSnapshot {
        let oid = format!("{}-{}", self.venue, self.next_id.fetch_add(1, Ordering::SeqCst));
        let fill_price = match order.order_type {
            OrderType::Limit => order.price,
            OrderType::Market => (*self.mark_price.lock()).or(order.price),
        };

        let (status, filled) = match plan {
            FillPlan::Fill => (OrderStatus::Filled, order.quantity),
            FillPlan::Partial(q) => {
                let q = (*q).min(order.quantity);
                let status = match order.order_type {
                    OrderType::Limit if q < order.quantity => OrderStatus::PartiallyFilled,
                    OrderType::Market if q < order.quantity => OrderStatus::Canceled,
                    _ => OrderStatus::Filled,
                };
                (status, q)
            }
            FillPlan::FillAfter(_) | FillPlan::Rest | FillPlan::Fail(_) => {
                (OrderStatus::Open, Size::ZERO)
            }
        };

        let mut snapshot = OrderSnapshot::new(OrderIdentity::new(
            Some(VenueOrderId::new(oid.clone())),
            Some(order.client_order_id.clone()),
        ))
        .with_instrument(order.instrument.clone())
        .with_requested(order.quantity)
        .with_status(status)
        .with_filled(filled);
        snapshot.side = Some(order.side);
        snapshot.price = order.price;
        snapshot.updated_at = Some(now_ms());
        if filled.is_positive() {
            snapshot.avg_price = fill_price;
        }

        self.client_index
            .insert(order.client_order_id.as_str().to_string(), oid.clone());
        self.orders.insert(
            oid.clone(),
            PaperOrder {
                snapshot: snapshot.clone(),
                order_type: order.order_type,
            },
        );

        if let FillPlan::FillAfter(delay) = plan {
            self.schedule_fill(oid, *delay, order.quantity, fill_price);
        }
        snapshot
    }

    fn schedule_fill(&self, oid: String, delay: Duration, quantity: Size, price: Option<Price>) {
        let orders = Arc::clone(&self.orders);
        let callbacks = Arc::clone(&self.callbacks);
        let connected = Arc::clone(&self.push_connected);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let update = {
                let Some(mut order) = orders.get_mut(&oid) else {
                    return;
                };
                if order.snapshot.is_terminal() {
                    return;
                }
                order.snapshot.status = Some(OrderStatus::Filled);
                order.snapshot.filled = Some(quantity);
                order.snapshot.avg_price = price;
                order.snapshot.updated_at = Some(now_ms());
                order.snapshot.clone()
            };
            if connected.load(Ordering::SeqCst) {
                emit_to(&callbacks, update);
            }
        });
    }
}

fn emit_to(callbacks: &Callbacks, snapshot: OrderSnapshot) {
    let subscribers = callbacks.lock().clone();
    for callback in subscribers {
        callback(snapshot.clone());
    }
}

impl VenueAdapter for PaperVenue {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn create_order(&self, order: NewOrder) -> BoxFuture<'_, VenueResult<OrderSnapshot>> {
        Box::pin(async move {
            self.submissions.lock().push(order.clone());

            if !order.reduce_only && self.openings_restricted.load(Ordering::SeqCst) {
                return Err(VenueError::ReduceOnly(
                    "invalid reduce only mode".to_string(),
                ));
            }
            if let Some(existing) = self.client_index.get(order.client_order_id.as_str()) {
                return Err(VenueError::DuplicateClientId(format!(
                    "{} already used by {}",
                    order.client_order_id,
                    existing.value()
                )));
            }

            let plan = self.next_plan();
            if let FillPlan::Fail(error) = plan {
                return Err(error);
            }

            let snapshot = self.accept(&order, &plan);
            debug!(
                venue = %self.venue,
                order = %snapshot.identity,
                side = %order.side,
                quantity = %order.quantity,
                status = ?snapshot.status,
                "Paper order accepted"
            );
            self.push(snapshot.clone());
            Ok(snapshot)
        })
    }

    fn cancel_order(
        &self,
        id: OrderIdentity,
        _instrument: InstrumentId,
    ) -> BoxFuture<'_, VenueResult<()>> {
        Box::pin(async move {
            self.cancels.lock().push(id.clone());
            if let Some(error) = self.cancel_failures.lock().pop_front() {
                return Err(error);
            }
            let Some(oid) = self.lookup(&id) else {
                return Err(VenueError::OrderNotFound(id.to_string()));
            };

            let update = {
                let Some(mut order) = self.orders.get_mut(&oid) else {
                    return Err(VenueError::OrderNotFound(id.to_string()));
                };
                if order.snapshot.is_terminal() {
                    return Ok(());
                }
                order.snapshot.status = Some(OrderStatus::Canceled);
                order.snapshot.updated_at = Some(now_ms());
                order.snapshot.clone()
            };
            self.push(update);
            Ok(())
        })
    }

    fn get_order(
        &self,
        id: OrderIdentity,
        _instrument: InstrumentId,
    ) -> BoxFuture<'_, VenueResult<Option<OrderSnapshot>>> {
        Box::pin(async move {
            if !self.query_supported.load(Ordering::SeqCst) {
                return Err(VenueError::Unsupported("get_order"));
            }
            let snapshot = self.lookup(&id).and_then(|oid| self.order(&oid));
            Ok(snapshot.map(|mut s| {
                if self.hide_fill_on_query.load(Ordering::SeqCst) {
                    s.filled = None;
                }
                s
            }))
        })
    }

    fn get_order_history(
        &self,
        instrument: InstrumentId,
        limit: usize,
    ) -> BoxFuture<'_, VenueResult<Vec<OrderSnapshot>>> {
        Box::pin(async move {
            if !self.history_supported.load(Ordering::SeqCst) {
                return Err(VenueError::Unsupported("get_order_history"));
            }
            let mut history: Vec<(u64, OrderSnapshot)> = self
                .orders
                .iter()
                .filter(|o| o.snapshot.instrument.as_ref() == Some(&instrument))
                .map(|o| {
                    let seq = o
                        .key()
                        .rsplit('-')
                        .next()
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    (seq, o.snapshot.clone())
                })
                .collect();
            history.sort_by(|a, b| b.0.cmp(&a.0));
            Ok(history.into_iter().take(limit).map(|(_, s)| s).collect())
        })
    }

    fn supports_order_query(&self) -> bool {
        self.query_supported.load(Ordering::SeqCst)
    }

    fn supports_order_history(&self) -> bool {
        self.history_supported.load(Ordering::SeqCst)
    }

    fn push_connected(&self) -> bool {
        self.push_supported.load(Ordering::SeqCst) && self.push_connected.load(Ordering::SeqCst)
    }

    fn subscribe_order_updates(&self, callback: OrderUpdateCallback) -> VenueResult<()> {
        if !self.push_supported.load(Ordering::SeqCst) {
            return Err(VenueError::Unsupported("subscribe_order_updates"));
        }
        self.callbacks.lock().push(callback);
        Ok(())
    }
}

impl std::fmt::Debug for PaperVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperVenue")
            .field("venue", &self.venue)
            .field("orders", &self.orders.len())
            .field("push_connected", &self.push_connected())
            .finish()
    }
}
