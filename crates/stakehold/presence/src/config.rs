//! Presence session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the geofence is breached during the dwell loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachPolicy {
    /// Sampling stops early but the session still yields a check-in,
    /// marked as presence not held.
    Lenient,
    /// The session is rejected and no check-in is produced.
    Strict,
}

/// Parameters of a verification session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Geofence radius around the anchor fix, in metres.
    pub radius_m: f64,

    /// Required dwell duration. The default is the low-stakes fast
    /// path; production deployments configure 15-30 minutes.
    pub dwell: Duration,

    /// Interval between position fixes.
    pub sample_interval: Duration,

    /// Probability that a session requires a selfie. Drawn once at
    /// session start, never re-rolled mid-session.
    pub selfie_probability: f64,

    pub breach_policy: BreachPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            radius_m: 150.0,
            dwell: Duration::from_secs(60),
            sample_interval: Duration::from_secs(1),
            selfie_probability: 1.0 / 3.0,
            breach_policy: BreachPolicy::Lenient,
        }
    }
}

impl SessionConfig {
    /// Number of sampling iterations the dwell duration allows.
    pub fn iterations(&self) -> u32 {
        let interval_ms = self.sample_interval.as_millis().max(1);
        (self.dwell.as_millis() / interval_ms) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_design_values() {
        let config = SessionConfig::default();
        assert_eq!(config.radius_m, 150.0);
        assert_eq!(config.dwell, Duration::from_secs(60));
        assert_eq!(config.sample_interval, Duration::from_secs(1));
        assert_eq!(config.iterations(), 60);
        assert_eq!(config.breach_policy, BreachPolicy::Lenient);
    }
}
