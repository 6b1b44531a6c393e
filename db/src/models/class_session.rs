use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, Set};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A scheduled class occurrence that students check in against.
///
/// The session carries its own token material: a per-session `secret` and the
/// current `token_version`. Refreshing the token bumps the version, which is
/// what revokes the previous value regardless of its expiry.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "class_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub faculty_id: i64,
    pub subject: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    pub secret: String,
    pub token_version: i64,
    pub token_issued_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        faculty_id: i64,
        subject: &str,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        secret_hex: Option<&str>,
    ) -> Result<Self, DbErr> {
        let secret = match secret_hex {
            Some(s) => s.to_owned(),
            None => {
                use rand::RngCore;
                let mut buf = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut buf);
                hex::encode(buf)
            }
        };

        let now = Utc::now();
        let session = ActiveModel {
            faculty_id: Set(faculty_id),
            subject: Set(subject.to_owned()),
            scheduled_start: Set(scheduled_start),
            scheduled_end: Set(scheduled_end),
            latitude: Set(latitude),
            longitude: Set(longitude),
            radius_m: Set(radius_m),
            secret: Set(secret),
            token_version: Set(0),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        session.insert(db).await
    }

    /// Explicitly close the session. Expired is terminal; a closed session is
    /// never revived.
    pub async fn close(self, db: &DatabaseConnection) -> Result<Self, DbErr> {
        let mut active: ActiveModel = self.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(db).await
    }

    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        if !self.active || now > self.scheduled_end {
            SessionStatus::Expired
        } else {
            SessionStatus::Active
        }
    }

    #[inline]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == SessionStatus::Active
    }

    pub fn duration(&self) -> Duration {
        self.scheduled_end - self.scheduled_start
    }

    /// Derives the MAC portion of a token value for a given (version,
    /// issued_at) pair, keyed with the per-session secret. The session id is
    /// mixed in so a value can never validate against another session.
    pub fn token_code(&self, version: i64, issued_at: DateTime<Utc>) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC key");
        mac.update(&self.id.to_be_bytes());
        mac.update(&version.to_be_bytes());
        mac.update(&issued_at.timestamp().to_be_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
