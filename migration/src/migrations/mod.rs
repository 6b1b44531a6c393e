pub mod m202601050001_create_class_sessions;
pub mod m202601050002_create_attendance_records;
pub mod m202601050003_create_suspicious_activities;
pub mod m202601050004_create_face_enrollments;
