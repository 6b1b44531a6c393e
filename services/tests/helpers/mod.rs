use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use std::sync::atomic::{AtomicBool, Ordering};

use db::models::class_session::Model as ClassSession;
use services::error::{AttendanceError, AttendanceResult};
use services::face_match::{FaceMatchClient, FaceMatchOutcome};
use services::session_token::{SessionTokenManager, Token};

pub const TEST_SECRET: &str =
    "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

// Hatfield campus, Pretoria.
pub const CENTER_LAT: f64 = -25.7545;
pub const CENTER_LNG: f64 = 28.2314;

/// Oracle double returning a fixed confidence; the verified verdict applies
/// the same threshold rule as the HTTP client.
pub struct StubFaceClient {
    pub confidence: f64,
    pub threshold: f64,
}

impl StubFaceClient {
    pub fn matching() -> Self {
        Self {
            confidence: 0.92,
            threshold: 0.85,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            confidence: 0.40,
            threshold: 0.85,
        }
    }
}

#[async_trait]
impl FaceMatchClient for StubFaceClient {
    async fn verify(
        &self,
        _live_image: &[u8],
        _reference: &str,
        _subject_id: i64,
    ) -> AttendanceResult<FaceMatchOutcome> {
        Ok(FaceMatchOutcome {
            verified: self.confidence >= self.threshold,
            confidence: self.confidence,
        })
    }
}

/// Fails the first call with a transport error, then behaves like a match.
pub struct FlakyFaceClient {
    tripped: AtomicBool,
}

impl FlakyFaceClient {
    pub fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FaceMatchClient for FlakyFaceClient {
    async fn verify(
        &self,
        _live_image: &[u8],
        _reference: &str,
        _subject_id: i64,
    ) -> AttendanceResult<FaceMatchOutcome> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(AttendanceError::FaceServiceUnavailable);
        }
        Ok(FaceMatchOutcome {
            verified: true,
            confidence: 0.95,
        })
    }
}

/// Seeds a session whose scheduled window contains the wall clock, with the
/// campus-center fence, and issues the initial token.
pub async fn seed_session_with_token(
    db: &DatabaseConnection,
    started_ago: Duration,
) -> (ClassSession, Token, DateTime<Utc>) {
    let now = Utc::now();
    let session = ClassSession::create(
        db,
        1,
        "COS 101",
        now - started_ago,
        now - started_ago + Duration::hours(1),
        CENTER_LAT,
        CENTER_LNG,
        50.0,
        Some(TEST_SECRET),
    )
    .await
    .expect("create session");

    let token = SessionTokenManager::issue(db, &session)
        .await
        .expect("issue token");
    let session = reload_session(db, session.id).await;

    (session, token, now)
}

pub async fn reload_session(db: &DatabaseConnection, id: i64) -> ClassSession {
    use sea_orm::EntityTrait;
    db::models::class_session::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("query session")
        .expect("session exists")
}
