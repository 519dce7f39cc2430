//! Reduce-only recovery probing.
//!
//! Restricted pairs are re-tested on a fixed wall-clock schedule (hourly at
//! `:00:05` by default): each probe sends a minimal opening order on a failed
//! leg through [`ExecutionEngine::probe_leg`]. The first accepted probe clears
//! the whole pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arbx_core::{LegKey, PairId, Size};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::ExecutionEngine;
use crate::halt::ExecutionEvent;

/// Time until the next `interval` boundary plus `offset`, in UTC.
///
/// Never zero: a call exactly on a boundary waits a full interval.
#[must_use]
pub fn next_fire_delay(now: DateTime<Utc>, interval: Duration, offset: Duration) -> Duration {
    let period = interval.as_secs().max(1) as i64;
    let offset = (offset.as_secs() as i64).rem_euclid(period);
    let into_period = (now.timestamp() - offset).rem_euclid(period);
    let wait = Duration::from_secs((period - into_period) as u64);
    let elapsed_subsec = Duration::from_nanos(u64::from(now.timestamp_subsec_nanos()));
    if wait > elapsed_subsec {
        wait - elapsed_subsec
    } else {
        wait
    }
}

/// Periodic prober for the reduce-only guard.
#[derive(Debug, Clone)]
pub struct ProbeService {
    engine: Arc<ExecutionEngine>,
}

impl ProbeService {
    #[must_use]
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    fn enabled(&self) -> bool {
        let config = self.engine.config();
        config.probe.enabled && !config.is_observation_mode()
    }

    /// Probe every restricted pair once. Returns the pairs cleared.
    ///
    /// Legs shared by several pairs are probed once per round.
    pub async fn run_once(&self) -> Vec<PairId> {
        let mut cleared = Vec::new();
        if !self.enabled() {
            return cleared;
        }
        let guard = self.engine.guard();
        let targets = guard.legs_to_probe();
        if targets.is_empty() {
            return cleared;
        }

        let quantity = Size::new(self.engine.config().probe.quantity);
        let mut probed: HashMap<LegKey, bool> = HashMap::new();
        for target in targets {
            if cleared.contains(&target.pair_id) {
                continue;
            }
            let success = match probed.get(&target.leg) {
                Some(success) => *success,
                None => {
                    let success = self.engine.probe_leg(&target.leg, quantity).await;
                    probed.insert(target.leg.clone(), success);
                    success
                }
            };

            guard.record_probe_result(&target.pair_id, &target.leg, success);
            if success {
                self.engine.events().emit(ExecutionEvent::ReduceOnlyCleared {
                    pair_id: target.pair_id.clone(),
                    leg: target.leg.clone(),
                });
                cleared.push(target.pair_id);
            }
        }

        info!(
            probed = probed.len(),
            cleared = cleared.len(),
            still_blocked = guard.blocked_pairs().len(),
            "Reduce-only probe round finished"
        );
        cleared
    }

    /// Run probe rounds on schedule until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        if !self.enabled() {
            info!("Reduce-only probing disabled");
            return;
        }
        let config = &self.engine.config().probe;
        let interval = Duration::from_secs(config.interval_secs);
        let offset = Duration::from_secs(config.offset_secs);
        info!(
            interval_secs = config.interval_secs,
            offset_secs = config.offset_secs,
            "Reduce-only probe service started"
        );

        loop {
            let delay = next_fire_delay(Utc::now(), interval, offset);
            debug!(delay_secs = delay.as_secs(), "Next reduce-only probe");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => {
                    info!("Reduce-only probe service stopped");
                    return;
                }
            }
            self.run_once().await;
        }
    }
}
