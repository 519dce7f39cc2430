//! Reduce-only quarantine.
//!
//! When a venue answers an opening order with a reduce-only restriction, the
//! trade pair is quarantined: new openings are refused, closings optionally
//! too, until a probe order on the restricted leg succeeds again.

use std::collections::{BTreeSet, HashMap};

use arbx_core::{LegKey, PairId};
use arbx_telemetry::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Restriction state of one trade pair.
#[derive(Debug, Clone, Serialize)]
pub struct ReduceOnlyPairState {
    pub pair_id: PairId,
    pub legs: BTreeSet<LegKey>,
    /// Legs that failed with the explicit reduce-only signal.
    pub failed_legs: BTreeSet<LegKey>,
    pub blocking: bool,
    pub closing_blocked: bool,
    pub first_detected: DateTime<Utc>,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ReduceOnlyPairState {
    /// Legs to probe: the ones that returned the reduce-only signal.
    #[must_use]
    pub fn probe_legs(&self) -> &BTreeSet<LegKey> {
        &self.failed_legs
    }
}

/// One leg to probe on behalf of a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub pair_id: PairId,
    pub leg: LegKey,
}

#[derive(Debug, Default)]
struct GuardState {
    pairs: HashMap<PairId, ReduceOnlyPairState>,
    leg_to_pairs: HashMap<LegKey, BTreeSet<PairId>>,
}

impl GuardState {
    fn clear(&mut self, pair_id: &PairId) -> Option<ReduceOnlyPairState> {
        let state = self.pairs.remove(pair_id)?;
        for leg in &state.legs {
            if let Some(pairs) = self.leg_to_pairs.get_mut(leg) {
                pairs.remove(pair_id);
                if pairs.is_empty() {
                    self.leg_to_pairs.remove(leg);
                }
            }
        }
        Some(state)
    }

    fn blocked_count(&self) -> usize {
        self.pairs.values().filter(|s| s.blocking).count()
    }
}

/// Tracks pairs restricted to closing-only trades.
#[derive(Debug, Default)]
pub struct ReduceOnlyGuard {
    state: Mutex<GuardState>,
}

impl ReduceOnlyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `failed_leg` returned the reduce-only signal. Idempotent:
    /// legs are unioned, `closing_blocked` is OR-ed and the failed leg is added.
    pub fn mark_restricted(
        &self,
        pair_id: &PairId,
        legs: impl IntoIterator<Item = LegKey>,
        failed_leg: LegKey,
        closing_blocked: bool,
        reason: Option<&str>,
    ) {
        let legs: BTreeSet<LegKey> = legs.into_iter().collect();
        let mut guard = self.state.lock();
        let now = Utc::now();

        let state = guard
            .pairs
            .entry(pair_id.clone())
            .or_insert_with(|| ReduceOnlyPairState {
                pair_id: pair_id.clone(),
                legs: BTreeSet::new(),
                failed_legs: BTreeSet::new(),
                blocking: true,
                closing_blocked: false,
                first_detected: now,
                last_probe: None,
                last_error: None,
            });
        state.blocking = true;
        state.closing_blocked |= closing_blocked;
        state.legs.extend(legs.iter().cloned());
        state.legs.insert(failed_leg.clone());
        state.failed_legs.insert(failed_leg.clone());
        if let Some(reason) = reason {
            state.last_error = Some(reason.to_string());
        }
        let all_legs: Vec<LegKey> = state.legs.iter().cloned().collect();

        for leg in all_legs {
            guard
                .leg_to_pairs
                .entry(leg)
                .or_default()
                .insert(pair_id.clone());
        }
        let count = guard.blocked_count();
        drop(guard);

        warn!(
            pair_id = %pair_id,
            failed_leg = %failed_leg,
            closing_blocked,
            reason = reason.unwrap_or(""),
            "Pair restricted to reduce-only"
        );
        Metrics::reduce_only_blocked_pairs(count);
    }

    /// Openings on this pair are refused.
    #[must_use]
    pub fn is_blocked(&self, pair_id: &PairId) -> bool {
        self.state
            .lock()
            .pairs
            .get(pair_id)
            .is_some_and(|s| s.blocking)
    }

    /// Closings on this pair are refused too.
    #[must_use]
    pub fn is_closing_blocked(&self, pair_id: &PairId) -> bool {
        self.state
            .lock()
            .pairs
            .get(pair_id)
            .is_some_and(|s| s.blocking && s.closing_blocked)
    }

    /// Legs to probe for every blocked pair, grouped by pair.
    #[must_use]
    pub fn legs_to_probe(&self) -> Vec<ProbeTarget> {
        let guard = self.state.lock();
        let mut pairs: Vec<&ReduceOnlyPairState> =
            guard.pairs.values().filter(|s| s.blocking).collect();
        pairs.sort_by(|a, b| a.pair_id.cmp(&b.pair_id));

        pairs
            .into_iter()
            .flat_map(|state| {
                state.probe_legs().iter().map(|leg| ProbeTarget {
                    pair_id: state.pair_id.clone(),
                    leg: leg.clone(),
                })
            })
            .collect()
    }

    /// Record a probe. Success clears the whole pair; failure keeps it blocked
    /// and remembers the leg as failed.
    pub fn record_probe_result(&self, pair_id: &PairId, leg: &LegKey, success: bool) {
        let mut guard = self.state.lock();
        let Some(state) = guard.pairs.get_mut(pair_id) else {
            return;
        };
        state.last_probe = Some(Utc::now());

        if success {
            guard.clear(pair_id);
            let count = guard.blocked_count();
            drop(guard);
            info!(pair_id = %pair_id, leg = %leg, "Reduce-only restriction cleared");
            Metrics::reduce_only_blocked_pairs(count);
        } else {
            state.failed_legs.insert(leg.clone());
            state.legs.insert(leg.clone());
            guard
                .leg_to_pairs
                .entry(leg.clone())
                .or_default()
                .insert(pair_id.clone());
            drop(guard);
            info!(pair_id = %pair_id, leg = %leg, "Leg still reduce-only");
        }
    }

    #[must_use]
    pub fn blocked_pairs(&self) -> Vec<ReduceOnlyPairState> {
        let guard = self.state.lock();
        let mut pairs: Vec<_> = guard.pairs.values().filter(|s| s.blocking).cloned().collect();
        pairs.sort_by(|a, b| a.pair_id.cmp(&b.pair_id));
        pairs
    }

    #[must_use]
    pub fn pair_state(&self, pair_id: &PairId) -> Option<ReduceOnlyPairState> {
        self.state.lock().pairs.get(pair_id).cloned()
    }

    /// Pairs that include this leg.
    #[must_use]
    pub fn pairs_for_leg(&self, leg: &LegKey) -> Vec<PairId> {
        self.state
            .lock()
            .leg_to_pairs
            .get(leg)
            .map(|pairs| pairs.iter().cloned().collect())
            .unwrap_or_default()
    }
}
