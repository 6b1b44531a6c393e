use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use std::sync::Arc;

use db::models::attendance_record::{
    ActiveModel, AttendanceStatus, Column, Entity, Model as AttendanceRecord,
};
use db::models::class_session::{Entity as SessionEntity, Model as ClassSession};
use db::models::face_enrollment::Model as FaceEnrollment;

use crate::capability::{Camera, LocationProvider, acquire_location, capture_image};
use crate::error::{AttendanceError, AttendanceResult};
use crate::face_match::FaceMatchClient;
use crate::geofence::{self, Coordinates};
use crate::session_token::SessionTokenManager;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Arrivals at most this long past the scheduled start are `present`;
    /// later ones (up to the scheduled end) are `late`.
    pub late_grace: Duration,
    /// Pause before the single retry of a transient failure.
    pub retry_backoff: std::time::Duration,
    pub location_timeout: std::time::Duration,
    pub capture_timeout: std::time::Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            late_grace: Duration::minutes(10),
            retry_backoff: std::time::Duration::from_millis(250),
            location_timeout: std::time::Duration::from_secs(10),
            capture_timeout: std::time::Duration::from_secs(10),
        }
    }
}

impl RecorderConfig {
    pub fn from_env() -> Self {
        let cfg = common::Config::get();
        Self {
            late_grace: Duration::minutes(cfg.late_grace_minutes),
            retry_backoff: std::time::Duration::from_millis(cfg.retry_backoff_ms),
            location_timeout: std::time::Duration::from_secs(cfg.location_timeout_seconds),
            capture_timeout: std::time::Duration::from_secs(cfg.capture_timeout_seconds),
        }
    }
}

/// One attendance attempt, assembled by the caller.
pub struct SubmitAttendance<'a> {
    pub student_id: i64,
    pub presented_token: &'a str,
    pub location: Coordinates,
    pub live_image: &'a [u8],
    /// Reference image override; when absent the student's current
    /// enrollment binding is used.
    pub reference_image: Option<&'a str>,
}

/// Commit gate for attendance. Combines the three signals in a fixed order,
/// short-circuiting on the first failure, and lets the storage layer's unique
/// index arbitrate concurrent submissions for the same (student, class) pair.
pub struct AttendanceRecorder {
    db: DatabaseConnection,
    face: Arc<dyn FaceMatchClient>,
    config: RecorderConfig,
}

impl AttendanceRecorder {
    pub fn new(
        db: DatabaseConnection,
        face: Arc<dyn FaceMatchClient>,
        config: RecorderConfig,
    ) -> Self {
        Self { db, face, config }
    }

    /// Token, fence, face, then a conditional insert. A rejected submission
    /// writes nothing; nothing below this call retries policy rejections.
    pub async fn submit(
        &self,
        session: &ClassSession,
        req: SubmitAttendance<'_>,
    ) -> AttendanceResult<AttendanceRecord> {
        self.submit_at(session, req, Utc::now()).await
    }

    /// `submit` with the session looked up by id first.
    pub async fn submit_for_class(
        &self,
        class_id: i64,
        req: SubmitAttendance<'_>,
    ) -> AttendanceResult<AttendanceRecord> {
        let session = SessionEntity::find_by_id(class_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                AttendanceError::StoreWriteFailure(DbErr::RecordNotFound(format!(
                    "class session {class_id}"
                )))
            })?;
        self.submit(&session, req).await
    }

    /// `submit` with an explicit clock, so the grace-window arithmetic is
    /// deterministic under test.
    pub async fn submit_at(
        &self,
        session: &ClassSession,
        req: SubmitAttendance<'_>,
        now: DateTime<Utc>,
    ) -> AttendanceResult<AttendanceRecord> {
        SessionTokenManager::validate(session, req.presented_token, now)?;

        let center = Coordinates::new(session.latitude, session.longitude);
        let distance_m = geofence::distance_m(&req.location, &center);
        if distance_m > session.radius_m {
            debug!(
                "submission for student {} rejected: {distance_m:.1} m from session {}",
                req.student_id, session.id
            );
            return Err(AttendanceError::LocationOutOfRadius { distance_m });
        }

        let reference = match req.reference_image {
            Some(r) => r.to_owned(),
            None => FaceEnrollment::for_student(&self.db, req.student_id)
                .await?
                .map(|e| e.reference_url)
                // Nothing enrolled means nothing can match.
                .ok_or(AttendanceError::FaceMismatch { confidence: 0.0 })?,
        };

        let outcome = match self
            .face
            .verify(req.live_image, &reference, req.student_id)
            .await
        {
            Err(err) if err.is_transient() => {
                tokio::time::sleep(self.config.retry_backoff).await;
                self.face
                    .verify(req.live_image, &reference, req.student_id)
                    .await?
            }
            other => other?,
        };
        if !outcome.verified {
            return Err(AttendanceError::FaceMismatch {
                confidence: outcome.confidence,
            });
        }

        let status = if now <= session.scheduled_start + self.config.late_grace {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Late
        };

        let record = ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            class_id: Set(session.id),
            student_id: Set(req.student_id),
            timestamp: Set(now),
            status: Set(status),
            latitude: Set(Some(req.location.latitude)),
            longitude: Set(Some(req.location.longitude)),
            face_verified: Set(true),
            qr_verified: Set(true),
            face_reference: Set(Some(reference)),
            recorded_by: Set(None),
        };

        let committed = self.commit(record, session.id, req.student_id).await?;
        info!(
            "attendance committed: student {} class {} status {}",
            committed.student_id, committed.class_id, committed.status
        );
        Ok(committed)
    }

    /// Faculty manual marking. Skips the three signals but still goes through
    /// the conditional insert, so it cannot double-mark either.
    pub async fn mark_manual(
        &self,
        session: &ClassSession,
        student_id: i64,
        recorded_by: i64,
        status: AttendanceStatus,
    ) -> AttendanceResult<AttendanceRecord> {
        let record = ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            class_id: Set(session.id),
            student_id: Set(student_id),
            timestamp: Set(Utc::now()),
            status: Set(status),
            latitude: Set(None),
            longitude: Set(None),
            face_verified: Set(false),
            qr_verified: Set(false),
            face_reference: Set(None),
            recorded_by: Set(Some(recorded_by)),
        };

        self.commit(record, session.id, student_id).await
    }

    /// The full client flow: bounded location acquisition, bounded capture
    /// (camera handle released on every exit), then `submit`.
    pub async fn check_in(
        &self,
        session: &ClassSession,
        student_id: i64,
        presented_token: &str,
        location_provider: &dyn LocationProvider,
        camera: &dyn Camera,
    ) -> AttendanceResult<AttendanceRecord> {
        let location = acquire_location(location_provider, self.config.location_timeout).await?;
        let live_image = capture_image(camera, self.config.capture_timeout).await?;

        self.submit(
            session,
            SubmitAttendance {
                student_id,
                presented_token,
                location,
                live_image: &live_image,
                reference_image: None,
            },
        )
        .await
    }

    /// Conditional write: a plain insert racing on the (class_id, student_id)
    /// unique index. Exactly one of two concurrent submissions lands; the
    /// loser gets `DuplicateRecord` with the winner's row. Other write
    /// failures get one retry with backoff.
    async fn commit(
        &self,
        record: ActiveModel,
        class_id: i64,
        student_id: i64,
    ) -> AttendanceResult<AttendanceRecord> {
        match record.clone().insert(&self.db).await {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => {
                self.existing_record(class_id, student_id).await
            }
            Err(first) => {
                debug!("attendance insert failed, retrying once: {first}");
                tokio::time::sleep(self.config.retry_backoff).await;
                match record.insert(&self.db).await {
                    Ok(row) => Ok(row),
                    Err(err) if is_unique_violation(&err) => {
                        self.existing_record(class_id, student_id).await
                    }
                    Err(err) => Err(AttendanceError::StoreWriteFailure(err)),
                }
            }
        }
    }

    async fn existing_record(
        &self,
        class_id: i64,
        student_id: i64,
    ) -> AttendanceResult<AttendanceRecord> {
        let existing = Entity::find()
            .filter(Column::ClassId.eq(class_id))
            .filter(Column::StudentId.eq(student_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                AttendanceError::StoreWriteFailure(DbErr::RecordNotFound(format!(
                    "attendance record for student {student_id} in class {class_id}"
                )))
            })?;

        Err(AttendanceError::DuplicateRecord(Box::new(existing)))
    }

    /// A student's committed records, newest first.
    pub async fn student_history(&self, student_id: i64) -> Result<Vec<AttendanceRecord>, DbErr> {
        Entity::find()
            .filter(Column::StudentId.eq(student_id))
            .order_by_desc(Column::Timestamp)
            .all(&self.db)
            .await
    }

    /// Everyone recorded for a class, newest first.
    pub async fn class_roster(&self, class_id: i64) -> Result<Vec<AttendanceRecord>, DbErr> {
        Entity::find()
            .filter(Column::ClassId.eq(class_id))
            .order_by_desc(Column::Timestamp)
            .all(&self.db)
            .await
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
