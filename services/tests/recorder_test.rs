mod helpers;

use chrono::Duration;
use std::sync::Arc;

use db::models::attendance_record::AttendanceStatus;
use db::models::face_enrollment::Model as FaceEnrollment;
use db::test_utils::setup_test_db;
use services::error::AttendanceError;
use services::geofence::Coordinates;
use services::recorder::{AttendanceRecorder, RecorderConfig, SubmitAttendance};

use helpers::{seed_session_with_token, FlakyFaceClient, StubFaceClient, CENTER_LAT, CENTER_LNG};

/// A point roughly `meters` north of the session center.
fn meters_north(meters: f64) -> Coordinates {
    Coordinates::new(CENTER_LAT + meters / 111_195.0, CENTER_LNG)
}

fn recorder(db: sea_orm::DatabaseConnection, face: Arc<dyn services::face_match::FaceMatchClient>) -> AttendanceRecorder {
    AttendanceRecorder::new(db, face, RecorderConfig::default())
}

#[tokio::test]
async fn verified_submission_inside_fence_is_present() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let record = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(40.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect("submission should commit");

    assert_eq!(record.status, AttendanceStatus::Present);
    assert!(record.face_verified);
    assert!(record.qr_verified);
    assert_eq!(record.class_id, session.id);
    assert_eq!(record.face_reference.as_deref(), Some("faces/student-100.png"));
}

#[tokio::test]
async fn out_of_radius_submission_writes_nothing() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let err = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(80.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect_err("80 m is outside a 50 m fence");

    match err {
        AttendanceError::LocationOutOfRadius { distance_m } => {
            assert!((70.0..90.0).contains(&distance_m), "got {distance_m}");
        }
        other => panic!("expected LocationOutOfRadius, got {other:?}"),
    }

    assert!(recorder.class_roster(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn face_mismatch_carries_confidence_and_writes_nothing() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::rejecting()));

    let err = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect_err("confidence 0.40 is below threshold");

    match err {
        AttendanceError::FaceMismatch { confidence } => assert!((confidence - 0.40).abs() < 1e-9),
        other => panic!("expected FaceMismatch, got {other:?}"),
    }
    assert!(recorder.class_roster(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_token_short_circuits_before_location() {
    let db = setup_test_db().await;
    let (session, _token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let err = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: "1.0.bogus",
                // Way outside the fence; the token must fail first.
                location: meters_north(5000.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect_err("bogus token");

    assert!(matches!(err, AttendanceError::TokenInvalid));
}

#[tokio::test]
async fn arrival_past_grace_is_late() {
    let db = setup_test_db().await;
    // Session started 30 minutes ago; default grace is 10 minutes.
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(30)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let record = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect("late arrival still commits");

    assert_eq!(record.status, AttendanceStatus::Late);
}

#[tokio::test]
async fn arrival_exactly_at_the_grace_boundary_is_present() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(0)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    // Default grace is 10 minutes; landing on the boundary itself still
    // counts as on time.
    let record = recorder
        .submit_at(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
            session.scheduled_start + Duration::minutes(10),
        )
        .await
        .expect("boundary arrival commits");

    assert_eq!(record.status, AttendanceStatus::Present);
}

#[tokio::test]
async fn arrival_one_second_past_the_grace_boundary_is_late() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(0)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let record = recorder
        .submit_at(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
            session.scheduled_start + Duration::minutes(10) + Duration::seconds(1),
        )
        .await
        .expect("still inside the session window");

    assert_eq!(record.status, AttendanceStatus::Late);
}

#[tokio::test]
async fn transient_face_outage_is_retried_once() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(FlakyFaceClient::new()));

    let record = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect("second attempt should succeed");

    assert!(record.face_verified);
}

#[tokio::test]
async fn second_submission_returns_the_existing_record() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let submit = |loc: Coordinates| SubmitAttendance {
        student_id: 100,
        presented_token: &token.value,
        location: loc,
        live_image: b"live-frame",
        reference_image: Some("faces/student-100.png"),
    };

    let first = recorder
        .submit(&session, submit(meters_north(10.0)))
        .await
        .expect("first submission");

    let err = recorder
        .submit(&session, submit(meters_north(12.0)))
        .await
        .expect_err("duplicate");

    match err {
        AttendanceError::DuplicateRecord(existing) => assert_eq!(existing.id, first.id),
        other => panic!("expected DuplicateRecord, got {other:?}"),
    }

    assert_eq!(recorder.class_roster(session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_submissions_commit_exactly_once() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = Arc::new(recorder(db.clone(), Arc::new(StubFaceClient::matching())));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let recorder = recorder.clone();
        let session = session.clone();
        let token_value = token.value.clone();
        handles.push(tokio::spawn(async move {
            recorder
                .submit(
                    &session,
                    SubmitAttendance {
                        student_id: 100,
                        presented_token: &token_value,
                        location: meters_north(10.0),
                        live_image: b"live-frame",
                        reference_image: Some("faces/student-100.png"),
                    },
                )
                .await
        }));
    }

    let mut committed = Vec::new();
    let mut duplicates = Vec::new();
    for handle in handles {
        match handle.await.expect("task") {
            Ok(record) => committed.push(record),
            Err(AttendanceError::DuplicateRecord(existing)) => duplicates.push(*existing),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(committed.len(), 1);
    assert_eq!(duplicates.len(), 1);
    assert_eq!(committed[0].id, duplicates[0].id);
    assert_eq!(recorder.class_roster(session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn submit_for_unknown_class_is_a_store_failure() {
    let db = setup_test_db().await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let err = recorder
        .submit_for_class(
            9999,
            SubmitAttendance {
                student_id: 100,
                presented_token: "9999.0.unused",
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect_err("no such session");

    assert!(matches!(err, AttendanceError::StoreWriteFailure(_)));
}

#[tokio::test]
async fn missing_enrollment_without_override_is_a_mismatch() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let err = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: None,
            },
        )
        .await
        .expect_err("no reference anywhere");

    assert!(matches!(
        err,
        AttendanceError::FaceMismatch { confidence } if confidence == 0.0
    ));
}

#[tokio::test]
async fn enrollment_binding_supplies_the_reference() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    FaceEnrollment::bind(&db, 100, "faces/enrolled-100.png")
        .await
        .expect("bind enrollment");
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let record = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: None,
            },
        )
        .await
        .expect("enrolled student commits");

    assert_eq!(
        record.face_reference.as_deref(),
        Some("faces/enrolled-100.png")
    );
}

#[tokio::test]
async fn manual_mark_cannot_double_mark_either() {
    let db = setup_test_db().await;
    let (session, token, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    let verified = recorder
        .submit(
            &session,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect("verified submission");

    let err = recorder
        .mark_manual(&session, 100, 1, AttendanceStatus::Present)
        .await
        .expect_err("pair already recorded");
    match err {
        AttendanceError::DuplicateRecord(existing) => assert_eq!(existing.id, verified.id),
        other => panic!("expected DuplicateRecord, got {other:?}"),
    }

    // A different student can still be marked manually.
    let manual = recorder
        .mark_manual(&session, 200, 1, AttendanceStatus::Absent)
        .await
        .expect("manual mark");
    assert_eq!(manual.recorded_by, Some(1));
    assert!(!manual.face_verified);
    assert!(!manual.qr_verified);
}

#[tokio::test]
async fn history_is_newest_first() {
    let db = setup_test_db().await;
    let (older, token_a, _) = seed_session_with_token(&db, Duration::minutes(40)).await;
    let (newer, token_b, _) = seed_session_with_token(&db, Duration::minutes(2)).await;
    let recorder = recorder(db.clone(), Arc::new(StubFaceClient::matching()));

    recorder
        .submit(
            &older,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token_a.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect("first class");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    recorder
        .submit(
            &newer,
            SubmitAttendance {
                student_id: 100,
                presented_token: &token_b.value,
                location: meters_north(10.0),
                live_image: b"live-frame",
                reference_image: Some("faces/student-100.png"),
            },
        )
        .await
        .expect("second class");

    let history = recorder.student_history(100).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp >= history[1].timestamp);
}
