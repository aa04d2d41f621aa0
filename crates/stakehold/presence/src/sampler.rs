//! Capability seam to the external geolocation/camera provider.

use async_trait::async_trait;
use stakehold_types::GeoPoint;
use thiserror::Error;

/// Why a position fix could not be obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FixError {
    /// The user denied location permission. A session degrades to an
    /// unverified check-in; this is not a failure.
    #[error("location permission denied")]
    PermissionDenied,

    /// No fix available right now (no signal, provider down).
    #[error("location unavailable")]
    Unavailable,
}

/// Provider of position fixes and the camera capability flag.
///
/// Implementations live outside the core; tests script one.
#[async_trait]
pub trait GeoSampler: Send + Sync {
    /// Obtain a single current position fix.
    async fn current_fix(&self) -> Result<GeoPoint, FixError>;

    /// Whether a camera is available for a selfie capture.
    fn has_camera(&self) -> bool;
}
