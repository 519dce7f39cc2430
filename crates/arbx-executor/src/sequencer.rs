//! Per-venue order sequencing.
//!
//! Some venues require strictly ordered order-mutating calls (nonce-ordered
//! signing, single-writer sessions). Venues configured with
//! `sequenced_orders` route create and cancel calls through one async mutex;
//! other venues pass straight through. Orthogonal to the rate limiter.

use std::collections::HashSet;
use std::sync::Arc;

use arbx_core::VenueId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-venue ordering locks.
#[derive(Debug, Default)]
pub struct OrderSequencer {
    sequenced: HashSet<VenueId>,
    locks: DashMap<VenueId, Arc<Mutex<()>>>,
}

impl OrderSequencer {
    #[must_use]
    pub fn new(sequenced: impl IntoIterator<Item = VenueId>) -> Self {
        Self {
            sequenced: sequenced.into_iter().collect(),
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_sequenced(&self, venue: &VenueId) -> bool {
        self.sequenced.contains(venue)
    }

    /// Take the venue's ordering lock, or `None` when the venue is unsequenced.
    pub async fn acquire(&self, venue: &VenueId) -> Option<OwnedMutexGuard<()>> {
        if !self.is_sequenced(venue) {
            return None;
        }
        let lock = Arc::clone(
            self.locks
                .entry(venue.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        Some(lock.lock_owned().await)
    }
}
