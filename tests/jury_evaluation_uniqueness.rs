mod test_support;

use serde_json::json;
use test_support::{
    assert_close, create_user, f64_field, request_err, request_ok, setup_practice, spawn_sidecar,
    str_field,
};

fn scores(p: f64, t: f64, pr: f64, a: f64) -> serde_json::Value {
    json!({ "presentation": p, "theory": t, "practical": pr, "attitude": a })
}

#[test]
fn second_evaluation_by_same_jury_is_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-jury-unique");
    let jury_id = create_user(&mut stdin, &mut reader, "jurado.uno", "Carla", "Mendoza", "JURY");

    let not_assigned = request_err(
        &mut stdin,
        &mut reader,
        "early",
        "jury.evaluate",
        json!({
            "practiceId": fx.practice_id,
            "juryId": jury_id,
            "scores": scores(16.0, 14.0, 18.0, 20.0),
            "remarks": "Buen desempeno",
        }),
    );
    assert_eq!(not_assigned, "not_assigned");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "assign",
        "jury.assign",
        json!({ "practiceId": fx.practice_id, "juryId": jury_id, "assignedOn": "2024-06-01" }),
    );
    let dup_assign = request_err(
        &mut stdin,
        &mut reader,
        "assign-again",
        "jury.assign",
        json!({ "practiceId": fx.practice_id, "juryId": jury_id }),
    );
    assert_eq!(dup_assign, "duplicate_assignment");

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "has-0",
        "jury.hasEvaluation",
        json!({ "juryId": jury_id, "practiceId": fx.practice_id }),
    );
    assert_eq!(before.get("exists"), Some(&json!(false)));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "eval-1",
        "jury.evaluate",
        json!({
            "practiceId": fx.practice_id,
            "juryId": jury_id,
            "scores": scores(16.0, 14.0, 18.0, 20.0),
            "remarks": "  Buen desempeno  ",
        }),
    );
    let evaluation = first.get("evaluation").expect("evaluation");
    assert_close(f64_field(evaluation, "grade"), 17.0);
    assert_eq!(str_field(evaluation, "remarks"), "Buen desempeno");
    // Single assigned member: the practice jury grade is that member's grade.
    assert_close(f64_field(&first, "juryGrade"), 17.0);

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "has-1",
        "jury.hasEvaluation",
        json!({ "juryId": jury_id, "practiceId": fx.practice_id }),
    );
    assert_eq!(after.get("exists"), Some(&json!(true)));

    let second = request_err(
        &mut stdin,
        &mut reader,
        "eval-2",
        "jury.evaluate",
        json!({
            "practiceId": fx.practice_id,
            "juryId": jury_id,
            "scores": scores(10.0, 10.0, 10.0, 10.0),
            "remarks": "Otra vez",
        }),
    );
    assert_eq!(second, "duplicate_evaluation");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "jury.list",
        json!({ "juryId": jury_id }),
    );
    let evaluations = listed
        .get("evaluations")
        .and_then(|v| v.as_array())
        .expect("evaluations");
    assert_eq!(evaluations.len(), 1);
    assert_close(f64_field(&evaluations[0], "grade"), 17.0);
}

#[test]
fn invalid_submissions_leave_no_evaluation() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-jury-invalid");
    let jury_id = create_user(&mut stdin, &mut reader, "jurado.dos", "Pedro", "Huaman", "JURY");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "assign",
        "jury.assign",
        json!({ "practiceId": fx.practice_id, "juryId": jury_id }),
    );

    let cases = [
        (scores(16.0, 14.0, 18.0, 20.5), "Ok", "invalid_score_range"),
        (scores(-0.5, 14.0, 18.0, 20.0), "Ok", "invalid_score_range"),
        (scores(16.0, 14.0, 18.0, 20.0), "   ", "empty_remarks"),
        (
            json!({ "presentation": 16, "theory": 14, "practical": 18 }),
            "Ok",
            "incomplete_criteria",
        ),
    ];
    for (i, (s, remarks, expected)) in cases.into_iter().enumerate() {
        let code = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "jury.evaluate",
            json!({
                "practiceId": fx.practice_id,
                "juryId": jury_id,
                "scores": s,
                "remarks": remarks,
            }),
        );
        assert_eq!(code, expected, "case {}", i);
    }

    let has = request_ok(
        &mut stdin,
        &mut reader,
        "has",
        "jury.hasEvaluation",
        json!({ "juryId": jury_id, "practiceId": fx.practice_id }),
    );
    assert_eq!(has.get("exists"), Some(&json!(false)));
}

#[test]
fn only_jury_members_can_be_assigned() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-jury-role");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "assign-teacher",
        "jury.assign",
        json!({ "practiceId": fx.practice_id, "juryId": fx.teacher_id }),
    );
    assert_eq!(code, "invalid_role");
}

#[test]
fn jury_grade_waits_for_every_assigned_member() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_practice(&mut stdin, &mut reader, "efsrt-jury-aggregate");
    let j1 = create_user(&mut stdin, &mut reader, "jurado.a", "Rosa", "Flores", "JURY");
    let j2 = create_user(&mut stdin, &mut reader, "jurado.b", "Mario", "Vega", "JURY");
    for (i, j) in [&j1, &j2].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("assign-{}", i),
            "jury.assign",
            json!({ "practiceId": fx.practice_id, "juryId": j }),
        );
    }

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "eval-a",
        "jury.evaluate",
        json!({
            "practiceId": fx.practice_id,
            "juryId": j1,
            "scores": scores(16.0, 14.0, 18.0, 20.0),
            "remarks": "Solido",
        }),
    );
    assert!(first.get("juryGrade").is_some_and(|v| v.is_null()));
    assert_eq!(first.get("evaluatedCount"), Some(&json!(1)));
    assert_eq!(first.get("assignedCount"), Some(&json!(2)));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "eval-b",
        "jury.evaluate",
        json!({
            "practiceId": fx.practice_id,
            "juryId": j2,
            "scores": scores(12.0, 12.0, 12.0, 12.0),
            "remarks": "Regular",
        }),
    );
    assert_close(f64_field(&second, "juryGrade"), 14.5);

    let assignments = request_ok(
        &mut stdin,
        &mut reader,
        "assignments",
        "jury.assignments",
        json!({ "practiceId": fx.practice_id }),
    );
    let rows = assignments
        .get("assignments")
        .and_then(|v| v.as_array())
        .expect("assignments");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("evaluated") == Some(&json!(true))));

    let late = create_user(&mut stdin, &mut reader, "jurado.c", "Elena", "Paz", "JURY");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "assign-late",
        "jury.assign",
        json!({ "practiceId": fx.practice_id, "juryId": late }),
    );
    assert_eq!(code, "already_evaluated");
}
