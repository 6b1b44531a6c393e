use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AttendanceError, AttendanceResult};
use crate::geofence::Coordinates;

pub type ImageBytes = Vec<u8>;

/// Platform geolocation capability. Failures (permission denied, no fix,
/// device timeout) all surface as `LocationUnavailable` with the platform's
/// reason; the caller decides whether to prompt the user again.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn acquire(&self) -> AttendanceResult<Coordinates>;
}

/// Platform camera capability. `open` hands out an exclusive handle;
/// implementations must release the underlying device when the handle is
/// dropped, so cancellation and error exits return it without ceremony.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self) -> AttendanceResult<Box<dyn CameraHandle>>;
}

#[async_trait]
pub trait CameraHandle: Send {
    async fn capture(&mut self) -> AttendanceResult<ImageBytes>;

    /// Idempotent early release; Drop must call through to the same path.
    fn release(&mut self);
}

/// Bounded location acquisition. A timer expiry maps to the typed error
/// rather than hanging the submission pipeline.
pub async fn acquire_location(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> AttendanceResult<Coordinates> {
    match tokio::time::timeout(timeout, provider.acquire()).await {
        Ok(res) => res,
        Err(_) => Err(AttendanceError::LocationUnavailable {
            reason: "location request timed out".into(),
        }),
    }
}

/// Bounded single-frame capture. The handle is released on every exit,
/// including the timeout path.
pub async fn capture_image(camera: &dyn Camera, timeout: Duration) -> AttendanceResult<ImageBytes> {
    let mut handle = camera.open().await?;
    let result = tokio::time::timeout(timeout, handle.capture()).await;
    handle.release();

    match result {
        Ok(frame) => frame,
        Err(_) => Err(AttendanceError::CameraUnavailable {
            reason: "capture timed out".into(),
        }),
    }
}
