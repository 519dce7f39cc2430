//! Per-venue rate limiting.
//!
//! Each venue gets a concurrency cap, a minimum spacing between reservations
//! and a cooldown window that throttling responses extend. A request touching
//! several venues reserves all of them up front through
//! [`RateLimiterRegistry::reserve_all`].

use std::sync::Arc;
use std::time::Duration;

use arbx_core::VenueId;
use arbx_telemetry::Metrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{EngineConfig, RateLimitConfig};
use crate::error::{ExecutorError, ExecutorResult};

#[derive(Debug, Default)]
struct Pacing {
    next_eligible: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl Pacing {
    fn blocked_until(&self) -> Option<Instant> {
        match (self.next_eligible, self.cooldown_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Rate limiter for one venue.
#[derive(Debug)]
pub struct VenueRateLimiter {
    venue: VenueId,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    min_interval: Duration,
    default_cooldown: Duration,
    pacing: Mutex<Pacing>,
}

impl VenueRateLimiter {
    #[must_use]
    pub fn new(venue: VenueId, config: &RateLimitConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            venue,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_interval: Duration::from_millis(config.min_interval_ms),
            default_cooldown: Duration::from_millis(config.cooldown_ms),
            pacing: Mutex::new(Pacing::default()),
        }
    }

    #[must_use]
    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    /// Wait for a permit, the pacing interval and any cooldown.
    pub async fn reserve(&self) -> ExecutorResult<RateLimitLease> {
        let started = Instant::now();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::LimiterClosed(self.venue.to_string()))?;

        loop {
            let wait_until = {
                let mut pacing = self.pacing.lock();
                let now = Instant::now();
                match pacing.blocked_until() {
                    Some(until) if until > now => Some(until),
                    _ => {
                        pacing.next_eligible = Some(now + self.min_interval);
                        None
                    }
                }
            };
            match wait_until {
                Some(until) => tokio::time::sleep_until(until).await,
                None => break,
            }
        }

        let waited = started.elapsed();
        Metrics::rate_limit_wait(self.venue.as_str(), waited.as_secs_f64() * 1000.0);
        if waited >= Duration::from_millis(1) {
            debug!(venue = %self.venue, waited_ms = waited.as_millis() as u64, "Rate limit wait");
        }

        Ok(RateLimitLease {
            venue: self.venue.clone(),
            _permit: permit,
        })
    }

    /// Extend the cooldown to now + `duration` (or the venue default).
    ///
    /// An existing later cooldown is kept.
    pub fn register_cooldown(&self, duration: Option<Duration>) {
        let duration = duration.unwrap_or(self.default_cooldown);
        let until = Instant::now() + duration;
        let mut pacing = self.pacing.lock();
        if pacing.cooldown_until.map_or(true, |current| until > current) {
            pacing.cooldown_until = Some(until);
            warn!(
                venue = %self.venue,
                cooldown_ms = duration.as_millis() as u64,
                "Venue throttled, cooling down"
            );
            Metrics::rate_limit_cooldown(self.venue.as_str());
        }
    }

    /// Time left on the current cooldown.
    #[must_use]
    pub fn cooldown_remaining(&self) -> Duration {
        self.pacing
            .lock()
            .cooldown_until
            .map_or(Duration::ZERO, |until| {
                until.saturating_duration_since(Instant::now())
            })
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Fail all pending and future reservations.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A held reservation on one venue. Released on drop.
#[derive(Debug)]
pub struct RateLimitLease {
    venue: VenueId,
    _permit: OwnedSemaphorePermit,
}

impl RateLimitLease {
    #[must_use]
    pub fn venue(&self) -> &VenueId {
        &self.venue
    }

    pub fn release(self) {
        drop(self);
    }
}

/// Reservations on every venue of one request.
#[derive(Debug, Default)]
pub struct MultiLease {
    leases: Vec<RateLimitLease>,
}

impl MultiLease {
    #[must_use]
    pub fn venues(&self) -> Vec<&VenueId> {
        self.leases.iter().map(RateLimitLease::venue).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn release(self) {
        drop(self);
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Lazily created limiters for every venue.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    config: Arc<EngineConfig>,
    limiters: DashMap<VenueId, Arc<VenueRateLimiter>>,
}

impl RateLimiterRegistry {
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            limiters: DashMap::new(),
        }
    }

    /// Limiter for a venue, created from its config on first use.
    pub fn limiter(&self, venue: &VenueId) -> Arc<VenueRateLimiter> {
        if let Some(limiter) = self.limiters.get(venue) {
            return Arc::clone(limiter.value());
        }
        let limiter = self
            .limiters
            .entry(venue.clone())
            .or_insert_with(|| {
                let config = self.config.venue(venue).rate_limit;
                Arc::new(VenueRateLimiter::new(venue.clone(), &config))
            });
        Arc::clone(limiter.value())
    }

    pub async fn reserve(&self, venue: &VenueId) -> ExecutorResult<RateLimitLease> {
        self.limiter(venue).reserve().await
    }

    /// Reserve every listed venue.
    ///
    /// Venues are deduplicated and taken in sorted order so two requests on
    /// the same venues can never hold one each and wait on the other.
    pub async fn reserve_all(&self, venues: &[VenueId]) -> ExecutorResult<MultiLease> {
        let mut ordered: Vec<&VenueId> = venues.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut leases = Vec::with_capacity(ordered.len());
        for venue in ordered {
            leases.push(self.reserve(venue).await?);
        }
        Ok(MultiLease { leases })
    }

    pub fn register_cooldown(&self, venue: &VenueId, duration: Option<Duration>) {
        self.limiter(venue).register_cooldown(duration);
    }
}
