//! Stakehold Presence - geofenced presence verification
//!
//! A verification session samples the user's position against an anchor
//! fix for a configured dwell duration and produces the evidence attached
//! to a check-in. Sessions degrade instead of failing: a capability
//! denial yields an unverified check-in, and sampler errors never escape
//! the session.

#![deny(unsafe_code)]

pub mod config;
pub mod geo;
pub mod sampler;
pub mod session;

pub use config::{BreachPolicy, SessionConfig};
pub use geo::haversine_m;
pub use sampler::{FixError, GeoSampler};
pub use session::{PresenceVerifier, SessionResult};
