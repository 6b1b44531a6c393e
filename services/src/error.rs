use sea_orm::DbErr;

pub use db::models::attendance_record::Model as AttendanceRecord;

pub type AttendanceResult<T> = Result<T, AttendanceError>;

/// Outcome taxonomy for a single attendance attempt.
///
/// Policy rejections (expired/invalid token, out-of-radius, mismatch) are
/// terminal for the attempt and never retried here. Transient infrastructure
/// failures (`FaceServiceUnavailable`, `StoreWriteFailure`) get exactly one
/// retry with a short backoff inside the recorder before surfacing.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("session token has expired")]
    TokenExpired,

    #[error("session token is not valid for this session")]
    TokenInvalid,

    #[error("location unavailable: {reason}")]
    LocationUnavailable { reason: String },

    #[error("location is outside the session area ({distance_m:.1} m from center)")]
    LocationOutOfRadius { distance_m: f64 },

    #[error("camera unavailable: {reason}")]
    CameraUnavailable { reason: String },

    #[error("face did not match the enrolled reference (confidence {confidence:.2})")]
    FaceMismatch { confidence: f64 },

    #[error("face verification service unavailable")]
    FaceServiceUnavailable,

    /// The (student, class) pair already has a committed record. Carries the
    /// existing row so the caller sees an idempotent result, not an opaque
    /// failure.
    #[error("attendance already recorded for this class")]
    DuplicateRecord(Box<AttendanceRecord>),

    #[error("store write failed: {0}")]
    StoreWriteFailure(#[from] DbErr),
}

impl AttendanceError {
    /// Transient infrastructure failures are the only class the recorder is
    /// allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AttendanceError::FaceServiceUnavailable | AttendanceError::StoreWriteFailure(_)
        )
    }
}
