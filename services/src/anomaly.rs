use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, QueryOrder, Set, SqlErr};
use std::collections::{BTreeSet, HashMap};

use db::models::attendance_record::{
    Column as RecordColumn, Entity as RecordEntity, Model as AttendanceRecord,
};
use db::models::class_session::{Entity as SessionEntity, Model as ClassSession};
use db::models::suspicious_activity::{
    ActiveModel as ActivityActiveModel, ActivityKind, Model as SuspiciousActivity, Severity,
};

/// Detection thresholds. Every value is tunable; the defaults mirror the
/// documented configuration defaults.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Sliding window for duplicate-location and multiple-faces grouping.
    pub window: Duration,
    /// Two coordinates are "the same place" when both axes differ by at most
    /// this many degrees.
    pub epsilon_deg: f64,
    /// Period of the background scan loop.
    pub scan_interval: std::time::Duration,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(5),
            epsilon_deg: 0.0001,
            scan_interval: std::time::Duration::from_secs(60),
        }
    }
}

impl AnomalyConfig {
    pub fn from_env() -> Self {
        let cfg = common::Config::get();
        Self {
            window: Duration::minutes(cfg.anomaly_window_minutes),
            epsilon_deg: cfg.anomaly_epsilon_degrees,
            scan_interval: std::time::Duration::from_secs(cfg.anomaly_scan_interval_seconds),
        }
    }
}

/// Scans committed records for fraud patterns, entirely off the commit path.
///
/// The scan is a full pass over the record set; the unique evidence key on
/// suspicious_activities makes re-emission of a known finding a no-op, so
/// rescans are free and the detector keeps no cursor state.
pub struct AnomalyDetector {
    db: DatabaseConnection,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(db: DatabaseConnection, config: AnomalyConfig) -> Self {
        Self { db, config }
    }

    /// Periodic scan loop. Intended to be spawned; errors are logged and the
    /// loop keeps going, lagging the record stream by at most one interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        loop {
            ticker.tick().await;
            match self.scan_once(Utc::now()).await {
                Ok(found) if !found.is_empty() => {
                    info!("anomaly scan flagged {} new activities", found.len())
                }
                Ok(_) => debug!("anomaly scan found nothing new"),
                Err(err) => warn!("anomaly scan failed: {err}"),
            }
        }
    }

    /// One full pass. Returns only the activities inserted by this pass;
    /// findings whose evidence set was already recorded are skipped.
    pub async fn scan_once(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SuspiciousActivity>, DbErr> {
        let records = RecordEntity::find()
            .order_by_asc(RecordColumn::Timestamp)
            .all(&self.db)
            .await?;
        let sessions: HashMap<i64, ClassSession> = SessionEntity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut inserted = Vec::new();

        for ids in duplicate_location_groups(&records, self.config.window, self.config.epsilon_deg)
        {
            if let Some(row) = self
                .insert_activity(ActivityKind::DuplicateLocation, ids, Severity::High, now)
                .await?
            {
                inserted.push(row);
            }
        }

        for ids in multiple_face_groups(&records, self.config.window) {
            if let Some(row) = self
                .insert_activity(ActivityKind::MultipleFaces, ids, Severity::High, now)
                .await?
            {
                inserted.push(row);
            }
        }

        for id in out_of_session_records(&records, &sessions) {
            if let Some(row) = self
                .insert_activity(ActivityKind::TimeAnomaly, vec![id], Severity::Medium, now)
                .await?
            {
                inserted.push(row);
            }
        }

        Ok(inserted)
    }

    async fn insert_activity(
        &self,
        kind: ActivityKind,
        record_ids: Vec<String>,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> Result<Option<SuspiciousActivity>, DbErr> {
        let evidence_key = SuspiciousActivity::evidence_key_for(kind, &record_ids);

        let row = ActivityActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            kind: Set(kind),
            related_record_ids: Set(serde_json::json!(record_ids)),
            severity: Set(severity),
            evidence_key: Set(evidence_key),
            detected_at: Set(now),
        };

        match row.insert(&self.db).await {
            Ok(model) => Ok(Some(model)),
            // Already flagged in an earlier scan.
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Clusters records that sit at the same coordinates inside one window.
/// A cluster is suspicious when it spans two or more distinct students.
fn duplicate_location_groups(
    records: &[AttendanceRecord],
    window: Duration,
    epsilon_deg: f64,
) -> Vec<Vec<String>> {
    let mut claimed = vec![false; records.len()];
    let mut groups = Vec::new();

    for i in 0..records.len() {
        if claimed[i] {
            continue;
        }
        let Some((lat_i, lng_i)) = records[i].coordinates() else {
            continue;
        };

        let mut members = vec![i];
        for (j, record) in records.iter().enumerate().skip(i + 1) {
            if claimed[j] {
                continue;
            }
            if record.timestamp - records[i].timestamp > window {
                break;
            }
            let Some((lat_j, lng_j)) = record.coordinates() else {
                continue;
            };
            if (lat_j - lat_i).abs() <= epsilon_deg && (lng_j - lng_i).abs() <= epsilon_deg {
                members.push(j);
            }
        }

        let students: BTreeSet<i64> = members.iter().map(|&k| records[k].student_id).collect();
        if students.len() >= 2 {
            for &k in &members {
                claimed[k] = true;
            }
            groups.push(members.iter().map(|&k| records[k].id.clone()).collect());
        }
    }

    groups
}

/// Per student: two verified records inside one window whose reference images
/// differ means the identity's enrollment changed between attempts.
fn multiple_face_groups(records: &[AttendanceRecord], window: Duration) -> Vec<Vec<String>> {
    let mut by_student: HashMap<i64, Vec<&AttendanceRecord>> = HashMap::new();
    for record in records {
        if record.face_reference.is_some() {
            by_student.entry(record.student_id).or_default().push(record);
        }
    }

    let mut groups = Vec::new();
    let mut students: Vec<_> = by_student.into_iter().collect();
    students.sort_by_key(|(id, _)| *id);

    for (_, student_records) in students {
        let mut involved: BTreeSet<String> = BTreeSet::new();
        for (a, b) in student_records
            .iter()
            .zip(student_records.iter().skip(1))
        {
            if b.timestamp - a.timestamp <= window && a.face_reference != b.face_reference {
                involved.insert(a.id.clone());
                involved.insert(b.id.clone());
            }
        }
        if !involved.is_empty() {
            groups.push(involved.into_iter().collect());
        }
    }

    groups
}

/// Records stamped outside their session's scheduled bounds.
fn out_of_session_records(
    records: &[AttendanceRecord],
    sessions: &HashMap<i64, ClassSession>,
) -> Vec<String> {
    records
        .iter()
        .filter(|r| {
            sessions
                .get(&r.class_id)
                .is_some_and(|s| r.timestamp < s.scheduled_start || r.timestamp > s.scheduled_end)
        })
        .map(|r| r.id.clone())
        .collect()
}
