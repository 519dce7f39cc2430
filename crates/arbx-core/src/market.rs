//! Venue, instrument and trade-pair identifiers.
//!
//! Venue names are case-insensitive and stored lowercase; instrument symbols
//! are stored uppercase. Both normalizations happen at construction so map
//! lookups never disagree on casing.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Exchange identifier (lowercase).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for VenueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// Venue-specific instrument symbol (uppercase), e.g. `BTC-USD-PERP`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for InstrumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// One (venue, instrument) leg location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LegKey {
    pub venue: VenueId,
    pub instrument: InstrumentId,
}

impl LegKey {
    #[must_use]
    pub fn new(venue: VenueId, instrument: InstrumentId) -> Self {
        Self { venue, instrument }
    }
}

impl fmt::Display for LegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.instrument)
    }
}

/// Identifier of a trade pair (the matched buy+sell combination).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(String);

impl PairId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_and_instrument_normalization() {
        assert_eq!(VenueId::new(" Lighter "), VenueId::new("lighter"));
        assert_eq!(InstrumentId::new("btc-usd"), InstrumentId::new("BTC-USD"));

        let key = LegKey::new("EdgeX".into(), "eth-perp".into());
        assert_eq!(key.to_string(), "edgex:ETH-PERP");
    }

    #[test]
    fn test_venue_deserialize_normalizes() {
        let venue: VenueId = serde_json::from_str("\"Paradex\"").unwrap();
        assert_eq!(venue.as_str(), "paradex");
    }
}
