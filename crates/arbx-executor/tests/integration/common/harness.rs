//! Engine harness over two paper venues.
//!
//! `alpha` carries the buy leg at 100, `beta` the sell leg at 101.

use std::sync::Arc;

use arbx_core::{
    InstrumentId, OrderSide, OrderType, Price, Size, TradeIntent, TradeLeg, TradeRequest, VenueId,
};
use arbx_executor::{
    DynVenue, EngineConfig, EventSink, ExecutionEngine, ExecutionEvent, OperatingMode,
    PaperVenue, VenueConfig, VenueRegistry,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

pub struct Harness {
    pub engine: Arc<ExecutionEngine>,
    pub alpha: Arc<PaperVenue>,
    pub beta: Arc<PaperVenue>,
    pub events: mpsc::Receiver<ExecutionEvent>,
}

impl Harness {
    /// Trading-mode engine with the given order type on each venue.
    pub fn new(alpha: OrderType, beta: OrderType) -> Self {
        Self::with_config(config(alpha, beta))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let alpha = Arc::new(PaperVenue::new("alpha"));
        let beta = Arc::new(PaperVenue::new("beta"));
        let venues = VenueRegistry::new()
            .with(alpha.clone() as DynVenue)
            .with(beta.clone() as DynVenue);
        let (tx, rx) = mpsc::channel(64);
        let engine = ExecutionEngine::new(config, venues, EventSink::new(tx)).unwrap();
        Self {
            engine: Arc::new(engine),
            alpha,
            beta,
            events: rx,
        }
    }

    /// Every event emitted so far.
    pub fn drain_events(&mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn config(alpha: OrderType, beta: OrderType) -> EngineConfig {
    let mut config = EngineConfig {
        mode: OperatingMode::Trading,
        ..Default::default()
    };
    for (name, order_type) in [("alpha", alpha), ("beta", beta)] {
        let mut venue = VenueConfig::default();
        venue.order_mode.order_type = order_type;
        config.venues.insert(name.to_string(), venue);
    }
    config
}

pub fn request(quantity: Decimal, intent: TradeIntent) -> TradeRequest {
    TradeRequest::new(
        "ETH",
        TradeLeg::new(
            VenueId::new("alpha"),
            InstrumentId::new("ETH"),
            OrderSide::Buy,
            Price::new(Decimal::ONE_HUNDRED),
        ),
        TradeLeg::new(
            VenueId::new("beta"),
            InstrumentId::new("ETH"),
            OrderSide::Sell,
            Price::new(Decimal::from(101)),
        ),
        Size::new(quantity),
        intent,
    )
    .unwrap()
}
