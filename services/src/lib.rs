pub mod anomaly;
pub mod capability;
pub mod error;
pub mod face_match;
pub mod geofence;
pub mod recorder;
pub mod session_token;

pub use error::{AttendanceError, AttendanceResult};
pub use geofence::Coordinates;
