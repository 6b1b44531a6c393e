use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A flagged pattern over committed attendance records, produced only by the
/// anomaly detector and never mutated afterwards. Records are referenced by
/// id; no ownership is implied.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "suspicious_activities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: ActivityKind,
    /// JSON array of attendance record ids backing this finding.
    pub related_record_ids: Json,
    pub severity: Severity,
    /// `<kind>:<sorted record ids joined with '+'>`. Unique, so re-scanning
    /// the same evidence set cannot produce a second row.
    pub evidence_key: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "suspicious_activity_kind")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ActivityKind {
    #[sea_orm(string_value = "duplicate_location")]
    DuplicateLocation,

    #[sea_orm(string_value = "multiple_faces")]
    MultipleFaces,

    #[sea_orm(string_value = "time_anomaly")]
    TimeAnomaly,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "suspicious_activity_severity")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    #[sea_orm(string_value = "low")]
    Low,

    #[sea_orm(string_value = "medium")]
    Medium,

    #[sea_orm(string_value = "high")]
    High,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Canonical dedupe key for an evidence set.
    pub fn evidence_key_for(kind: ActivityKind, record_ids: &[String]) -> String {
        let mut ids: Vec<&str> = record_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        format!("{kind}:{}", ids.join("+"))
    }

    pub fn related_ids(&self) -> Vec<String> {
        serde_json::from_value(self.related_record_ids.clone()).unwrap_or_default()
    }
}
