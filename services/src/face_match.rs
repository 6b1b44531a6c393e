use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::warn;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use db::models::face_enrollment::Model as FaceEnrollment;

use crate::error::{AttendanceError, AttendanceResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatchOutcome {
    pub verified: bool,
    pub confidence: f64,
}

/// Boundary to the external face-matching oracle. No image processing happens
/// on this side; implementations only carry the request and map the response.
/// Injected as a trait object so tests can substitute a double.
#[async_trait]
pub trait FaceMatchClient: Send + Sync {
    async fn verify(
        &self,
        live_image: &[u8],
        reference: &str,
        subject_id: i64,
    ) -> AttendanceResult<FaceMatchOutcome>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    live_image: String,
    stored_image_url: &'a str,
    user_id: i64,
}

#[derive(Deserialize)]
struct VerifyResponse {
    confidence: f64,
}

#[derive(Serialize)]
struct EnrollRequest {
    image: String,
    user_id: i64,
}

#[derive(Deserialize)]
struct EnrollResponse {
    url: String,
}

/// HTTP client for the face oracle. Every request is bounded by the
/// configured timeout; a non-2xx status, transport failure or body that does
/// not parse all collapse into `FaceServiceUnavailable`.
pub struct HttpFaceMatchClient {
    http: reqwest::Client,
    base_url: String,
    match_threshold: f64,
}

impl HttpFaceMatchClient {
    pub fn new(
        base_url: impl Into<String>,
        match_threshold: f64,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let base_url = base_url.into();
        assert!(
            !base_url.is_empty(),
            "face service base URL must not be empty (set FACE_API_BASE_URL)"
        );
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url,
            match_threshold,
        })
    }

    pub fn from_config() -> reqwest::Result<Self> {
        let cfg = common::Config::get();
        Self::new(
            cfg.face_api_base_url.clone(),
            cfg.face_match_threshold,
            Duration::from_secs(cfg.face_api_timeout_seconds),
        )
    }

    /// Sends a new reference image to the oracle and rebinds the student's
    /// enrollment to the URL it hands back.
    pub async fn enroll(
        &self,
        db: &DatabaseConnection,
        image: &[u8],
        student_id: i64,
    ) -> AttendanceResult<FaceEnrollment> {
        let req = EnrollRequest {
            image: BASE64.encode(image),
            user_id: student_id,
        };

        let resp = self
            .http
            .post(format!("{}/enroll", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                warn!("face enrollment transport failure: {e}");
                AttendanceError::FaceServiceUnavailable
            })?;

        if !resp.status().is_success() {
            warn!("face enrollment rejected with status {}", resp.status());
            return Err(AttendanceError::FaceServiceUnavailable);
        }

        let body: EnrollResponse = resp
            .json()
            .await
            .map_err(|_| AttendanceError::FaceServiceUnavailable)?;

        Ok(FaceEnrollment::bind(db, student_id, &body.url).await?)
    }
}

#[async_trait]
impl FaceMatchClient for HttpFaceMatchClient {
    async fn verify(
        &self,
        live_image: &[u8],
        reference: &str,
        subject_id: i64,
    ) -> AttendanceResult<FaceMatchOutcome> {
        let req = VerifyRequest {
            live_image: BASE64.encode(live_image),
            stored_image_url: reference,
            user_id: subject_id,
        };

        let resp = self
            .http
            .post(format!("{}/verify", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                warn!("face verify transport failure: {e}");
                AttendanceError::FaceServiceUnavailable
            })?;

        if !resp.status().is_success() {
            warn!("face verify rejected with status {}", resp.status());
            return Err(AttendanceError::FaceServiceUnavailable);
        }

        let body: VerifyResponse = resp
            .json()
            .await
            .map_err(|_| AttendanceError::FaceServiceUnavailable)?;

        // The verdict is ours, not the oracle's: verified means the reported
        // confidence clears the configured threshold.
        Ok(FaceMatchOutcome {
            verified: body.confidence >= self.match_threshold,
            confidence: body.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "base URL must not be empty")]
    fn empty_base_url_is_rejected_at_construction() {
        let _ = HttpFaceMatchClient::new("", 0.85, Duration::from_secs(1));
    }
}
