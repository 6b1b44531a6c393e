pub mod attendance_record;
pub mod class_session;
pub mod face_enrollment;
pub mod suspicious_activity;
