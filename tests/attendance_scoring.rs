mod test_support;

use serde_json::json;
use test_support::{
    assert_close, f64_field, record_present, request_err, request_ok, setup_practice,
    spawn_sidecar, str_field,
};

#[test]
fn daily_and_running_general_scores() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-attendance-running");

    let first = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-04", [15, 18, 12]);
    assert_close(f64_field(&first, "dailyScore"), 15.0);
    assert_close(f64_field(&first, "generalScore"), 15.0);

    let second = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-05", [10, 10, 10]);
    assert_close(f64_field(&second, "dailyScore"), 10.0);
    assert_close(f64_field(&second, "generalScore"), 12.5);

    let third = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-06", [20, 20, 19]);
    assert_close(f64_field(&third, "dailyScore"), 19.67);
    assert_close(f64_field(&third, "generalScore"), 14.89);

    let absent = request_ok(
        &mut stdin,
        &mut reader,
        "absent",
        "attendance.record",
        json!({
            "practiceId": fx.practice_id,
            "date": "2024-03-07",
            "status": "ABSENT",
            "punctuality": "LATE",
        }),
    );
    assert_close(f64_field(&absent, "dailyScore"), 0.0);
    assert!(absent.get("criteria").is_some_and(|v| v.is_null()));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "attendance.list",
        json!({ "practiceId": fx.practice_id }),
    );
    let records = listed
        .get("records")
        .and_then(|v| v.as_array())
        .expect("records");
    assert_eq!(records.len(), 4);
    let dates: Vec<String> = records.iter().map(|r| str_field(r, "date")).collect();
    assert_eq!(
        dates,
        vec!["2024-03-04", "2024-03-05", "2024-03-06", "2024-03-07"]
    );
    // (15 + 10 + 19.67 + 0) / 4
    assert_close(f64_field(&listed, "generalScore"), 11.17);
}

#[test]
fn backfilled_session_restates_later_general_scores() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-attendance-backfill");

    let _ = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-06", [10, 10, 10]);
    let earlier = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-05", [15, 18, 12]);
    assert_close(f64_field(&earlier, "generalScore"), 15.0);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "attendance.list",
        json!({ "practiceId": fx.practice_id }),
    );
    let records = listed
        .get("records")
        .and_then(|v| v.as_array())
        .expect("records");
    assert_eq!(str_field(&records[1], "date"), "2024-03-06");
    assert_close(f64_field(&records[1], "generalScore"), 12.5);
}

#[test]
fn invalid_sessions_are_rejected_without_writes() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-attendance-invalid");

    let cases = [
        (
            json!({ "conceptual": 21, "procedural": 10, "attitudinal": 10 }),
            "invalid_score_range",
        ),
        (
            json!({ "conceptual": 12.5, "procedural": 10, "attitudinal": 10 }),
            "invalid_score_range",
        ),
        (
            json!({ "conceptual": -1, "procedural": 10, "attitudinal": 10 }),
            "invalid_score_range",
        ),
        (
            json!({ "conceptual": "high", "procedural": 10, "attitudinal": 10 }),
            "invalid_score_range",
        ),
        (
            json!({ "conceptual": 12, "procedural": 10 }),
            "incomplete_criteria",
        ),
        (
            json!({ "conceptual": 12, "procedural": 10, "attitudinal": 10, "effort": 3 }),
            "unknown_criterion",
        ),
    ];
    for (i, (criteria, expected)) in cases.into_iter().enumerate() {
        let code = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "attendance.record",
            json!({
                "practiceId": fx.practice_id,
                "date": "2024-03-04",
                "status": "PRESENT",
                "punctuality": "ON_TIME",
                "criteria": criteria,
            }),
        );
        assert_eq!(code, expected, "case {}", i);
    }

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "present-no-criteria",
        "attendance.record",
        json!({
            "practiceId": fx.practice_id,
            "date": "2024-03-04",
            "status": "PRESENT",
            "punctuality": "ON_TIME",
        }),
    );
    assert_eq!(missing, "incomplete_criteria");

    let absent_scored = request_err(
        &mut stdin,
        &mut reader,
        "absent-scored",
        "attendance.record",
        json!({
            "practiceId": fx.practice_id,
            "date": "2024-03-04",
            "status": "ABSENT",
            "punctuality": "ON_TIME",
            "criteria": { "conceptual": 10, "procedural": 10, "attitudinal": 10 },
        }),
    );
    assert_eq!(absent_scored, "absent_with_scores");

    let bad_status = request_err(
        &mut stdin,
        &mut reader,
        "bad-status",
        "attendance.record",
        json!({
            "practiceId": fx.practice_id,
            "date": "2024-03-04",
            "status": "EXCUSED",
            "punctuality": "ON_TIME",
        }),
    );
    assert_eq!(bad_status, "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "attendance.list",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_eq!(
        listed
            .get("records")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    let practice = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "practices.get",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_eq!(str_field(&practice, "state"), "PENDING");
}

#[test]
fn first_session_starts_practice_and_dates_are_unique() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-attendance-unique");

    let _ = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-04", [14, 14, 14]);
    let practice = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "practices.get",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_eq!(str_field(&practice, "state"), "IN_PROGRESS");

    let dup = request_err(
        &mut stdin,
        &mut reader,
        "dup",
        "attendance.record",
        json!({
            "practiceId": fx.practice_id,
            "date": "2024-03-04",
            "status": "ABSENT",
            "punctuality": "ON_TIME",
        }),
    );
    assert_eq!(dup, "duplicate_session");
}

#[test]
fn closing_attendance_sets_the_component_grade() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-attendance-close");

    let empty = request_err(
        &mut stdin,
        &mut reader,
        "close-empty",
        "attendance.close",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_eq!(empty, "no_sessions");

    let _ = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-04", [15, 18, 12]);
    let _ = record_present(&mut stdin, &mut reader, &fx.practice_id, "2024-03-05", [10, 10, 10]);

    let closed = request_ok(
        &mut stdin,
        &mut reader,
        "close",
        "attendance.close",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_close(f64_field(&closed, "attendanceGrade"), 12.5);
    assert_eq!(str_field(&closed, "finalGrade"), "PENDING");

    let again = request_err(
        &mut stdin,
        &mut reader,
        "close-again",
        "attendance.close",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_eq!(again, "already_evaluated");

    let late = request_err(
        &mut stdin,
        &mut reader,
        "late",
        "attendance.record",
        json!({
            "practiceId": fx.practice_id,
            "date": "2024-03-06",
            "status": "ABSENT",
            "punctuality": "ON_TIME",
        }),
    );
    assert_eq!(late, "attendance_closed");

    let practice = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "practices.get",
        json!({ "practiceId": fx.practice_id }),
    );
    assert_close(
        practice
            .pointer("/grades/attendance")
            .and_then(|v| v.as_f64())
            .expect("attendance grade"),
        12.5,
    );
    assert_eq!(practice.get("attendanceClosed"), Some(&json!(true)));
}
