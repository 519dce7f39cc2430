//! Engine configuration.
//!
//! Every field has a serde default so partial TOML files work. Per-venue
//! settings live under `[venues.<name>]` with a `[venues.default]` fallback;
//! order modes can be overridden per instrument with `venue:INSTRUMENT` keys.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use arbx_core::{InstrumentId, OrderType, Price, VenueId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, ExecutorResult};

/// Key of the fallback venue entry.
pub const DEFAULT_VENUE_KEY: &str = "default";

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Log requests, place nothing.
    #[default]
    Observation,
    /// Place orders.
    Trading,
}

// ============================================================================
// Retry / Compensation / Limit-Limit / Probe
// ============================================================================

/// Placement retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base for transient errors (ms). Default: 2,000.
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap (ms). Default: 15,000.
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    2_000
}

fn default_retry_max_ms() -> u64 {
    15_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
        }
    }
}

/// Unwind behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationConfig {
    /// Unwind attempts on the remaining quantity. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fill wait per unwind order (ms). Default: 10,000.
    #[serde(default = "default_market_timeout_ms")]
    pub timeout_ms: u64,
    /// Trip the halt latch when an unwind fails. Default: true.
    #[serde(default = "default_true")]
    pub halt_on_failure: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_ms: default_market_timeout_ms(),
            halt_on_failure: true,
        }
    }
}

/// Dual-limit execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitLimitConfig {
    /// Allow both legs as concurrent limit orders. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Corrective limit orders before falling back to market. Default: 1.
    #[serde(default = "default_corrective_limit_attempts")]
    pub corrective_limit_attempts: u32,
}

fn default_corrective_limit_attempts() -> u32 {
    1
}

impl Default for LimitLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            corrective_limit_attempts: default_corrective_limit_attempts(),
        }
    }
}

/// Reduce-only recovery probe schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Period between probe rounds (secs). Default: 3,600.
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    /// Offset into each period (secs). Default: 5 (minute 0, second 5).
    #[serde(default = "default_probe_offset_secs")]
    pub offset_secs: u64,
    /// Probe order quantity. Default: 0.001.
    #[serde(default = "default_probe_quantity")]
    pub quantity: Decimal,
}

fn default_probe_interval_secs() -> u64 {
    3_600
}

fn default_probe_offset_secs() -> u64 {
    5
}

fn default_probe_quantity() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_probe_interval_secs(),
            offset_secs: default_probe_offset_secs(),
            quantity: default_probe_quantity(),
        }
    }
}

// ============================================================================
// Venue Settings
// ============================================================================

/// Per-venue rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Concurrent reservations. Default: 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Minimum spacing between reservations (ms). Default: 0.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Cooldown after a throttling response without a hint (ms). Default: 1,000.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_cooldown_ms() -> u64 {
    1_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_interval_ms: 0,
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Order shape and limit pricing for a venue or venue:instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderModeConfig {
    /// Default: limit.
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    /// Higher runs first when one limit leg must lead. Default: 0.
    #[serde(default)]
    pub priority: i32,
    /// Percentage improvement for limit prices. Default: 0.001 (0.1%).
    #[serde(default = "default_limit_offset_pct")]
    pub limit_offset_pct: Decimal,
    /// Step one tick inside the target instead of using a percentage.
    #[serde(default)]
    pub use_tick_precision: bool,
    /// Tick size; derived from the target price's decimals when absent.
    #[serde(default)]
    pub tick_size: Option<Price>,
    /// Never run this venue in a concurrent dual-limit pair.
    #[serde(default)]
    pub force_sequential_limit: bool,
}

fn default_order_type() -> OrderType {
    OrderType::Limit
}

fn default_limit_offset_pct() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for OrderModeConfig {
    fn default() -> Self {
        Self {
            order_type: default_order_type(),
            priority: 0,
            limit_offset_pct: default_limit_offset_pct(),
            use_tick_precision: false,
            tick_size: None,
            force_sequential_limit: false,
        }
    }
}

/// Settings for one venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub order_mode: OrderModeConfig,
    /// Serialize create/cancel calls through one lock.
    #[serde(default)]
    pub sequenced_orders: bool,
    /// Send closing and unwind orders as reduce-only.
    #[serde(default)]
    pub reduce_only_on_close: bool,
}

// ============================================================================
// EngineConfig
// ============================================================================

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    /// Skip the inter-round pause (segmented entries pace themselves).
    #[serde(default)]
    pub segmented: bool,
    /// Pause between consecutive requests (ms). Default: 0.
    #[serde(default)]
    pub round_pause_ms: u64,
    /// Fill wait for limit orders (ms). Default: 60,000.
    #[serde(default = "default_limit_timeout_ms")]
    pub limit_order_timeout_ms: u64,
    /// Fill wait for market orders (ms). Default: 10,000.
    #[serde(default = "default_market_timeout_ms")]
    pub market_order_timeout_ms: u64,
    /// Poll interval without push (ms). Default: 2,000.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub compensation: CompensationConfig,
    #[serde(default)]
    pub limit_limit: LimitLimitConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Venue settings; `default` applies to unlisted venues.
    #[serde(default)]
    pub venues: HashMap<String, VenueConfig>,
    /// Order modes keyed by `venue:INSTRUMENT`.
    #[serde(default)]
    pub order_mode_overrides: HashMap<String, OrderModeConfig>,
}

fn default_limit_timeout_ms() -> u64 {
    60_000
}

fn default_market_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::default(),
            segmented: false,
            round_pause_ms: 0,
            limit_order_timeout_ms: default_limit_timeout_ms(),
            market_order_timeout_ms: default_market_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryConfig::default(),
            compensation: CompensationConfig::default(),
            limit_limit: LimitLimitConfig::default(),
            probe: ProbeConfig::default(),
            venues: HashMap::new(),
            order_mode_overrides: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> ExecutorResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ExecutorError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ExecutorResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ExecutorError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ExecutorError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.compensation.max_attempts == 0 {
            return Err(ExecutorError::Config(
                "compensation.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ExecutorError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        for (name, venue) in &self.venues {
            if venue.rate_limit.max_concurrent == 0 {
                return Err(ExecutorError::Config(format!(
                    "venues.{name}.rate_limit.max_concurrent must be at least 1"
                )));
            }
        }
        if self.probe.quantity <= Decimal::ZERO {
            return Err(ExecutorError::Config(
                "probe.quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_observation_mode(&self) -> bool {
        self.mode == OperatingMode::Observation
    }

    /// Settings for a venue, falling back to `default`, then built-in defaults.
    #[must_use]
    pub fn venue(&self, venue: &VenueId) -> VenueConfig {
        self.venues
            .get(venue.as_str())
            .or_else(|| self.venues.get(DEFAULT_VENUE_KEY))
            .cloned()
            .unwrap_or_default()
    }

    /// Order mode for a leg: `venue:INSTRUMENT`, then the venue, then `default`.
    #[must_use]
    pub fn order_mode(&self, venue: &VenueId, instrument: &InstrumentId) -> OrderModeConfig {
        let key = format!("{venue}:{instrument}");
        self.order_mode_overrides
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.venue(venue).order_mode)
    }

    #[must_use]
    pub fn limit_order_timeout(&self) -> Duration {
        Duration::from_millis(self.limit_order_timeout_ms)
    }

    #[must_use]
    pub fn market_order_timeout(&self) -> Duration {
        Duration::from_millis(self.market_order_timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn round_pause(&self) -> Duration {
        Duration::from_millis(self.round_pause_ms)
    }

    #[must_use]
    pub fn compensation_timeout(&self) -> Duration {
        Duration::from_millis(self.compensation.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert!(config.is_observation_mode());
        assert_eq!(config.limit_order_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert_eq!(config.retry.max_delay_ms, 15_000);
        assert_eq!(config.probe.quantity, dec!(0.001));

        let venue = config.venue(&VenueId::new("alpha"));
        assert_eq!(venue.rate_limit.max_concurrent, 1);
        assert_eq!(venue.rate_limit.min_interval_ms, 0);
        assert_eq!(venue.rate_limit.cooldown_ms, 1_000);
        assert_eq!(venue.order_mode.limit_offset_pct, dec!(0.001));
    }

    #[test]
    fn test_order_mode_lookup_order() {
        let config = EngineConfig::from_toml_str(
            r#"
            mode = "trading"

            [venues.default.order_mode]
            order_type = "market"

            [venues.alpha.order_mode]
            order_type = "limit"
            priority = 2

            [order_mode_overrides."alpha:BTC"]
            order_type = "market"
            "#,
        )
        .unwrap();

        let alpha = VenueId::new("alpha");
        assert_eq!(
            config.order_mode(&alpha, &InstrumentId::new("ETH")).order_type,
            OrderType::Limit
        );
        assert_eq!(
            config.order_mode(&alpha, &InstrumentId::new("btc")).order_type,
            OrderType::Market
        );
        assert_eq!(
            config
                .order_mode(&VenueId::new("beta"), &InstrumentId::new("ETH"))
                .order_type,
            OrderType::Market
        );
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = EngineConfig::from_toml_str(
            r#"
            [venues.alpha.rate_limit]
            max_concurrent = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }
}
