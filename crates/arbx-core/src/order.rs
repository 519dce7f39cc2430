//! Order-related enums and identifiers.
//!
//! A venue may reveal only one of its two ids at submission time and the other
//! later on the push stream, so both are carried together in [`OrderIdentity`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Buy)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Resting limit order (GTC).
    Limit,
    /// Immediate market order.
    Market,
}

impl OrderType {
    pub fn is_market(&self) -> bool {
        matches!(self, Self::Market)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// Lifecycle status of an order as reported by a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Client order ID for idempotency.
///
/// Every order carries a unique cloid, and retries of the same placement reuse
/// it so the venue can reject the duplicate instead of opening twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `arbx_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
        Self(format!("arbx_{ts}_{uuid_short}"))
    }

    /// Create from an existing string (for parsing responses).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Venue-assigned order ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueOrderId(String);

impl VenueOrderId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One key of an [`OrderIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderKey {
    Venue(VenueOrderId),
    Client(ClientOrderId),
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Venue(id) => write!(f, "oid:{id}"),
            Self::Client(id) => write!(f, "cloid:{id}"),
        }
    }
}

/// Identity of one logical order: venue id, client id, or both.
///
/// Two identities refer to the same order when either id is equal. This is
/// deliberately not `PartialEq`, since the relation is not transitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_order_id: Option<VenueOrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
}

impl OrderIdentity {
    #[must_use]
    pub fn from_client(id: ClientOrderId) -> Self {
        Self {
            venue_order_id: None,
            client_order_id: Some(id),
        }
    }

    #[must_use]
    pub fn from_venue(id: VenueOrderId) -> Self {
        Self {
            venue_order_id: Some(id),
            client_order_id: None,
        }
    }

    #[must_use]
    pub fn new(
        venue_order_id: Option<VenueOrderId>,
        client_order_id: Option<ClientOrderId>,
    ) -> Self {
        Self {
            venue_order_id,
            client_order_id,
        }
    }

    /// True when neither id is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.venue_order_id.is_none() && self.client_order_id.is_none()
    }

    /// True when `other` shares either id with `self`.
    #[must_use]
    pub fn matches(&self, other: &OrderIdentity) -> bool {
        let venue_eq = matches!(
            (&self.venue_order_id, &other.venue_order_id),
            (Some(a), Some(b)) if a == b
        );
        let client_eq = matches!(
            (&self.client_order_id, &other.client_order_id),
            (Some(a), Some(b)) if a == b
        );
        venue_eq || client_eq
    }

    /// Fill in ids learned later. Known ids are never replaced.
    pub fn absorb(&mut self, other: &OrderIdentity) {
        if self.venue_order_id.is_none() {
            self.venue_order_id = other.venue_order_id.clone();
        }
        if self.client_order_id.is_none() {
            self.client_order_id = other.client_order_id.clone();
        }
    }

    /// All known keys, venue id first.
    pub fn keys(&self) -> Vec<OrderKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(id) = &self.venue_order_id {
            keys.push(OrderKey::Venue(id.clone()));
        }
        if let Some(id) = &self.client_order_id {
            keys.push(OrderKey::Client(id.clone()));
        }
        keys
    }
}

impl fmt::Display for OrderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.venue_order_id, &self.client_order_id) {
            (Some(oid), Some(cloid)) => write!(f, "{oid}/{cloid}"),
            (Some(oid), None) => write!(f, "{oid}"),
            (None, Some(cloid)) => write!(f, "{cloid}"),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}
