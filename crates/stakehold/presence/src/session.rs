//! The verification session: anchor fix, dwell loop, evidence emission.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use stakehold_types::{DegradedReason, VerificationOutcome};

use crate::config::{BreachPolicy, SessionConfig};
use crate::geo::haversine_m;
use crate::sampler::{FixError, GeoSampler};

/// What a verification session produced.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionResult {
    /// Evidence for a check-in, verified or degraded.
    CheckIn(VerificationOutcome),
    /// Cancelled before the first fix; nothing is recorded.
    Aborted,
    /// Strict breach policy tripped; nothing is recorded.
    Rejected { distance_m: f64 },
}

/// Runs geofenced presence-verification sessions.
///
/// A session never propagates sampler errors: permission denial degrades
/// to an unverified check-in, and losing the fix mid-dwell ends sampling
/// with the best data so far.
pub struct PresenceVerifier {
    sampler: Arc<dyn GeoSampler>,
    config: SessionConfig,
}

impl PresenceVerifier {
    pub fn new(sampler: Arc<dyn GeoSampler>, config: SessionConfig) -> Self {
        Self { sampler, config }
    }

    pub fn with_defaults(sampler: Arc<dyn GeoSampler>) -> Self {
        Self::new(sampler, SessionConfig::default())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one verification session.
    ///
    /// `cancel` is a caller-supplied signal; flipping it to `true` aborts
    /// the session cleanly. Cancellation before the first fix records
    /// nothing; after it, the session emits partial evidence. Wall time
    /// is bounded by the configured dwell duration.
    #[instrument(skip(self, cancel), fields(radius_m = self.config.radius_m))]
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> SessionResult {
        if *cancel.borrow() {
            return SessionResult::Aborted;
        }

        let anchor = match self.sampler.current_fix().await {
            Ok(fix) => fix,
            Err(FixError::PermissionDenied) => {
                debug!("Location permission denied, degrading to unverified check-in");
                return SessionResult::CheckIn(VerificationOutcome::Unverified {
                    reason: DegradedReason::LocationPermissionDenied,
                });
            }
            Err(FixError::Unavailable) => {
                debug!("No location fix available, degrading to unverified check-in");
                return SessionResult::CheckIn(VerificationOutcome::Unverified {
                    reason: DegradedReason::LocationUnavailable,
                });
            }
        };

        // Drawn once per session, never re-rolled mid-dwell.
        let selfie_required = rand::thread_rng()
            .gen_bool(self.config.selfie_probability.clamp(0.0, 1.0));
        let selfie_captured = selfie_required && self.sampler.has_camera();

        let start = Instant::now();
        let deadline = start + self.config.dwell;
        let mut presence_held = true;

        for iteration in 0..self.config.iterations() {
            if Instant::now() >= deadline {
                break;
            }

            match self.sampler.current_fix().await {
                Ok(fix) => {
                    let distance_m = haversine_m(anchor, fix);
                    if distance_m >= self.config.radius_m {
                        warn!(distance_m, iteration, "Geofence breached during dwell");
                        if self.config.breach_policy == BreachPolicy::Strict {
                            return SessionResult::Rejected { distance_m };
                        }
                        presence_held = false;
                        break;
                    }
                }
                Err(error) => {
                    // Presence broken; keep the data gathered so far.
                    warn!(%error, iteration, "Lost position fix mid-dwell");
                    presence_held = false;
                    break;
                }
            }

            if cancellable_sleep(&self.config, &mut cancel).await {
                debug!(iteration, "Session cancelled mid-dwell");
                presence_held = false;
                break;
            }
        }

        let dwell = start.elapsed();
        debug!(
            dwell_ms = dwell.as_millis() as u64,
            presence_held, selfie_required, "Session finished"
        );
        SessionResult::CheckIn(VerificationOutcome::Verified {
            anchor,
            dwell,
            presence_held,
            selfie_required,
            selfie_captured,
        })
    }
}

/// Sleep one sampling interval; returns true when cancelled mid-sleep.
/// A dropped cancel sender means the caller gave up its handle, not a
/// cancellation: the sleep then runs to completion.
async fn cancellable_sleep(config: &SessionConfig, cancel: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(config.sample_interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    sleep.as_mut().await;
                    return false;
                }
            },
        }
    }
}
