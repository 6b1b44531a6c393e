use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use sea_orm::sea_query::Expr;

use db::models::class_session::{Column, Entity, Model as ClassSession, SessionStatus};

use crate::error::{AttendanceError, AttendanceResult};

/// A time-boxed credential bound to one class session and one version.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub version: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues, refreshes and validates session tokens.
///
/// Token values are `"<session_id>.<version>.<mac>"` where the MAC is keyed
/// with the per-session secret, so a value can neither be replayed against
/// another session nor survive a version bump. All writes are conditional on
/// the version the caller last saw: refresh is a compare-and-swap, and a
/// validation racing a refresh fails from the instant the swap commits.
pub struct SessionTokenManager;

impl SessionTokenManager {
    /// Issues a token for the session's current version. The token lives for
    /// the scheduled length of the session.
    pub async fn issue(
        db: &DatabaseConnection,
        session: &ClassSession,
    ) -> AttendanceResult<Token> {
        Self::persist(db, session, session.token_version, Utc::now()).await
    }

    /// Re-issues under an incremented version. Hard revocation: the previous
    /// value stops validating immediately, whatever its expiry said.
    pub async fn refresh(
        db: &DatabaseConnection,
        session: &ClassSession,
    ) -> AttendanceResult<Token> {
        Self::persist(db, session, session.token_version + 1, Utc::now()).await
    }

    async fn persist(
        db: &DatabaseConnection,
        session: &ClassSession,
        version: i64,
        issued_at: DateTime<Utc>,
    ) -> AttendanceResult<Token> {
        let expires_at = issued_at + session.duration();

        // Conditional on the version the caller saw; a lost race means a
        // concurrent issue/refresh won and this token must not be handed out.
        let res = Entity::update_many()
            .col_expr(Column::TokenVersion, Expr::value(version))
            .col_expr(Column::TokenIssuedAt, Expr::value(Some(issued_at)))
            .col_expr(Column::TokenExpiresAt, Expr::value(Some(expires_at)))
            .col_expr(Column::UpdatedAt, Expr::value(issued_at))
            .filter(Column::Id.eq(session.id))
            .filter(Column::TokenVersion.eq(session.token_version))
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            return Err(AttendanceError::StoreWriteFailure(DbErr::Custom(
                "concurrent token refresh".into(),
            )));
        }

        Ok(Token {
            value: compose(session, version, issued_at),
            version,
            issued_at,
            expires_at,
        })
    }

    /// Checks a presented value against the session's current token state.
    ///
    /// Order matters: an expired-but-otherwise-current token reports
    /// `TokenExpired`; everything else that fails to line up (foreign session
    /// id, stale version, bad MAC) reports `TokenInvalid`.
    pub fn validate(
        session: &ClassSession,
        presented: &str,
        now: DateTime<Utc>,
    ) -> AttendanceResult<()> {
        if session.status(now) == SessionStatus::Expired {
            return Err(AttendanceError::TokenExpired);
        }

        let (issued_at, expires_at) = match (session.token_issued_at, session.token_expires_at) {
            (Some(i), Some(e)) => (i, e),
            // No token has ever been issued for this session.
            _ => return Err(AttendanceError::TokenInvalid),
        };

        if now > expires_at {
            return Err(AttendanceError::TokenExpired);
        }

        let (sid, version, mac) = parse(presented).ok_or(AttendanceError::TokenInvalid)?;
        if sid != session.id
            || version != session.token_version
            || mac != session.token_code(version, issued_at)
        {
            return Err(AttendanceError::TokenInvalid);
        }

        Ok(())
    }
}

fn compose(session: &ClassSession, version: i64, issued_at: DateTime<Utc>) -> String {
    format!(
        "{}.{}.{}",
        session.id,
        version,
        session.token_code(version, issued_at)
    )
}

fn parse(value: &str) -> Option<(i64, i64, &str)> {
    let mut parts = value.splitn(3, '.');
    let sid = parts.next()?.parse().ok()?;
    let version = parts.next()?.parse().ok()?;
    let mac = parts.next()?;
    Some((sid, version, mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("not-a-token").is_none());
        assert!(parse("12.x.abcd").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn parse_round_trips() {
        let (sid, ver, mac) = parse("42.3.deadbeef").unwrap();
        assert_eq!((sid, ver, mac), (42, 3, "deadbeef"));
    }
}
