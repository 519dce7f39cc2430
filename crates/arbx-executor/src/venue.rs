//! Venue adapter contract.
//!
//! Each exchange is consumed through [`VenueAdapter`]. Exchange quirks
//! (signing, nonces, batch endpoints, slippage calibration, payload
//! normalization) are implementation choices of the adapter; the engine only
//! sees [`OrderSnapshot`]s and [`VenueError`]s.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use arbx_core::{
    ClientOrderId, InstrumentId, OrderIdentity, OrderSide, OrderSnapshot, OrderType, Price, Size,
    VenueId,
};
use rust_decimal::Decimal;

use crate::error::{VenueError, VenueResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Callback receiving push order updates.
///
/// Invoked from the adapter's stream task; must not block.
pub type OrderUpdateCallback = Arc<dyn Fn(OrderSnapshot) + Send + Sync>;

/// Order placement parameters.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Size,
    /// Limit price; ignored for market orders.
    pub price: Option<Price>,
    /// Reused on every retry of the same placement.
    pub client_order_id: ClientOrderId,
    pub reduce_only: bool,
    /// Resolved slippage tolerance for market orders (fraction).
    pub slippage_tolerance: Option<Decimal>,
}

/// Capability contract of one exchange.
///
/// Methods take owned arguments so the returned futures borrow only `self`.
pub trait VenueAdapter: Send + Sync {
    /// Venue this adapter trades on.
    fn venue(&self) -> &VenueId;

    /// Submit an order. The returned snapshot carries at least one id.
    fn create_order(&self, order: NewOrder) -> BoxFuture<'_, VenueResult<OrderSnapshot>>;

    /// Cancel an order. Must succeed if the order is already closed, or report
    /// [`VenueError::OrderNotFound`].
    fn cancel_order(
        &self,
        id: OrderIdentity,
        instrument: InstrumentId,
    ) -> BoxFuture<'_, VenueResult<()>>;

    /// Query one order. `Ok(None)` when the venue no longer knows it.
    fn get_order(
        &self,
        id: OrderIdentity,
        instrument: InstrumentId,
    ) -> BoxFuture<'_, VenueResult<Option<OrderSnapshot>>>;

    /// Recent orders on an instrument, newest first.
    fn get_order_history(
        &self,
        instrument: InstrumentId,
        limit: usize,
    ) -> BoxFuture<'_, VenueResult<Vec<OrderSnapshot>>> {
        let _ = (instrument, limit);
        Box::pin(async { Err(VenueError::Unsupported("get_order_history")) })
    }

    /// Whether `get_order` is available.
    fn supports_order_query(&self) -> bool {
        true
    }

    /// Whether `get_order_history` is available.
    fn supports_order_history(&self) -> bool {
        false
    }

    /// Whether the push channel is currently delivering order updates.
    fn push_connected(&self) -> bool;

    /// Register the push callback. Venues without a push channel return
    /// [`VenueError::Unsupported`].
    fn subscribe_order_updates(&self, callback: OrderUpdateCallback) -> VenueResult<()>;
}

/// Arc wrapper for VenueAdapter trait objects.
pub type DynVenue = Arc<dyn VenueAdapter>;

/// Adapters by venue.
#[derive(Clone, Default)]
pub struct VenueRegistry {
    venues: HashMap<VenueId, DynVenue>,
}

impl VenueRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own venue id, replacing any previous one.
    pub fn register(&mut self, adapter: DynVenue) {
        self.venues.insert(adapter.venue().clone(), adapter);
    }

    #[must_use]
    pub fn with(mut self, adapter: DynVenue) -> Self {
        self.register(adapter);
        self
    }

    #[must_use]
    pub fn get(&self, venue: &VenueId) -> Option<&DynVenue> {
        self.venues.get(venue)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VenueId, &DynVenue)> {
        self.venues.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.venues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}

impl std::fmt::Debug for VenueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut venues: Vec<_> = self.venues.keys().map(VenueId::as_str).collect();
        venues.sort_unstable();
        f.debug_struct("VenueRegistry")
            .field("venues", &venues)
            .finish()
    }
}
