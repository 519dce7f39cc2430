//! Trade requests handed to the execution engine.
//!
//! A [`TradeRequest`] is validated once at construction and immutable
//! afterwards; deserialization goes through the same validation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::market::{InstrumentId, LegKey, PairId, VenueId};
use crate::order::OrderSide;
use crate::{Price, Size};

/// Whether the trade opens or closes the arbitrage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeIntent {
    Open,
    Close,
}

impl TradeIntent {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// One leg of a trade request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub venue: VenueId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    /// Reference price the decision engine observed for this leg.
    pub target_price: Price,
    /// Absolute limit-price offset; overrides configured offsets.
    #[serde(default)]
    pub price_offset: Option<Price>,
}

impl TradeLeg {
    #[must_use]
    pub fn new(
        venue: VenueId,
        instrument: InstrumentId,
        side: OrderSide,
        target_price: Price,
    ) -> Self {
        Self {
            venue,
            instrument,
            side,
            target_price,
            price_offset: None,
        }
    }

    #[must_use]
    pub fn with_price_offset(mut self, offset: Price) -> Self {
        self.price_offset = Some(offset);
        self
    }

    #[must_use]
    pub fn key(&self) -> LegKey {
        LegKey::new(self.venue.clone(), self.instrument.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawTradeRequest {
    symbol: String,
    #[serde(default)]
    pair_id: Option<PairId>,
    legs: [TradeLeg; 2],
    quantity: Size,
    intent: TradeIntent,
    #[serde(default)]
    slippage_tolerance: Option<Decimal>,
    #[serde(default)]
    min_order_quantity: HashMap<VenueId, Size>,
}

/// A paired buy/sell request across two venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawTradeRequest")]
pub struct TradeRequest {
    symbol: String,
    pair_id: PairId,
    legs: [TradeLeg; 2],
    quantity: Size,
    intent: TradeIntent,
    slippage_tolerance: Option<Decimal>,
    min_order_quantity: HashMap<VenueId, Size>,
}

impl TradeRequest {
    /// Build and validate a request. The pair id defaults to the symbol.
    pub fn new(
        symbol: impl Into<String>,
        first: TradeLeg,
        second: TradeLeg,
        quantity: Size,
        intent: TradeIntent,
    ) -> Result<Self> {
        let symbol = symbol.into();
        let request = Self {
            pair_id: PairId::new(symbol.clone()),
            symbol,
            legs: [first, second],
            quantity,
            intent,
            slippage_tolerance: None,
            min_order_quantity: HashMap::new(),
        };
        request.validate()?;
        Ok(request)
    }

    #[must_use]
    pub fn with_pair_id(mut self, pair_id: PairId) -> Self {
        self.pair_id = pair_id;
        self
    }

    /// Slippage tolerance as a fraction (0.005 = 0.5%), already resolved for
    /// the venues involved.
    pub fn with_slippage_tolerance(mut self, tolerance: Decimal) -> Result<Self> {
        if tolerance.is_sign_negative() {
            return Err(CoreError::InvalidRequest(format!(
                "negative slippage tolerance {tolerance}"
            )));
        }
        self.slippage_tolerance = Some(tolerance);
        Ok(self)
    }

    #[must_use]
    pub fn with_min_order_quantity(mut self, venue: VenueId, min: Size) -> Self {
        self.min_order_quantity.insert(venue, min);
        self
    }

    fn validate(&self) -> Result<()> {
        let [a, b] = &self.legs;
        if a.side == b.side {
            return Err(CoreError::InvalidRequest(format!(
                "legs must be on opposite sides, both are {}",
                a.side
            )));
        }
        if !self.quantity.is_positive() {
            return Err(CoreError::InvalidSize(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        for leg in &self.legs {
            if !leg.target_price.is_positive() {
                return Err(CoreError::InvalidPrice(format!(
                    "{} target price must be positive, got {}",
                    leg.key(),
                    leg.target_price
                )));
            }
        }
        if a.key() == b.key() {
            return Err(CoreError::InvalidRequest(format!(
                "both legs target {}",
                a.key()
            )));
        }
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn pair_id(&self) -> &PairId {
        &self.pair_id
    }

    pub fn quantity(&self) -> Size {
        self.quantity
    }

    pub fn intent(&self) -> TradeIntent {
        self.intent
    }

    pub fn is_open(&self) -> bool {
        self.intent.is_open()
    }

    pub fn slippage_tolerance(&self) -> Option<Decimal> {
        self.slippage_tolerance
    }

    pub fn legs(&self) -> &[TradeLeg; 2] {
        &self.legs
    }

    pub fn buy_leg(&self) -> &TradeLeg {
        self.leg(OrderSide::Buy)
    }

    pub fn sell_leg(&self) -> &TradeLeg {
        self.leg(OrderSide::Sell)
    }

    /// The leg on `side`. Validation guarantees exactly one exists.
    pub fn leg(&self, side: OrderSide) -> &TradeLeg {
        let [a, b] = &self.legs;
        if a.side == side {
            a
        } else {
            b
        }
    }

    /// Both leg locations, buy first.
    pub fn leg_keys(&self) -> Vec<LegKey> {
        vec![self.buy_leg().key(), self.sell_leg().key()]
    }

    pub fn min_order_quantity(&self, venue: &VenueId) -> Option<Size> {
        self.min_order_quantity.get(venue).copied()
    }
}

impl TryFrom<RawTradeRequest> for TradeRequest {
    type Error = CoreError;

    fn try_from(raw: RawTradeRequest) -> Result<Self> {
        let [first, second] = raw.legs;
        let mut request = Self::new(raw.symbol, first, second, raw.quantity, raw.intent)?;
        if let Some(pair_id) = raw.pair_id {
            request.pair_id = pair_id;
        }
        if let Some(tolerance) = raw.slippage_tolerance {
            request = request.with_slippage_tolerance(tolerance)?;
        }
        request.min_order_quantity = raw.min_order_quantity;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(venue: &str, side: OrderSide, price: Decimal) -> TradeLeg {
        TradeLeg::new(venue.into(), "ETH".into(), side, Price::new(price))
    }

    #[test]
    fn test_request_requires_opposite_sides() {
        let err = TradeRequest::new(
            "ETH",
            leg("alpha", OrderSide::Buy, dec!(100)),
            leg("beta", OrderSide::Buy, dec!(101)),
            Size::ONE,
            TradeIntent::Open,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_rejects_zero_quantity() {
        let err = TradeRequest::new(
            "ETH",
            leg("alpha", OrderSide::Buy, dec!(100)),
            leg("beta", OrderSide::Sell, dec!(101)),
            Size::ZERO,
            TradeIntent::Open,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSize(_)));
    }

    #[test]
    fn test_request_leg_lookup() {
        let request = TradeRequest::new(
            "ETH",
            leg("beta", OrderSide::Sell, dec!(101)),
            leg("alpha", OrderSide::Buy, dec!(100)),
            Size::ONE,
            TradeIntent::Close,
        )
        .unwrap();

        assert_eq!(request.buy_leg().venue.as_str(), "alpha");
        assert_eq!(request.sell_leg().venue.as_str(), "beta");
        assert_eq!(request.pair_id().as_str(), "ETH");
        assert!(!request.is_open());
    }

    #[test]
    fn test_request_deserialize_validates() {
        let json = r#"{
            "symbol": "ETH",
            "legs": [
                {"venue": "Alpha", "instrument": "eth-perp", "side": "buy", "target_price": "100"},
                {"venue": "beta", "instrument": "ETH-PERP", "side": "sell", "target_price": "101"}
            ],
            "quantity": "0.5",
            "intent": "open",
            "slippage_tolerance": "0.002"
        }"#;
        let request: TradeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.buy_leg().venue.as_str(), "alpha");
        assert_eq!(request.slippage_tolerance(), Some(dec!(0.002)));

        let bad = json.replace("\"sell\"", "\"buy\"");
        assert!(serde_json::from_str::<TradeRequest>(&bad).is_err());
    }
}
