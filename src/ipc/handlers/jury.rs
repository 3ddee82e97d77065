use crate::calc::{self, EvaluationLedger, JuryRubric, ScoreError};
use crate::ipc::helpers::{
    commit_err, db_query_err, db_update_err, get_optional_str, get_required_str,
    is_unique_violation, load_grading_config, load_open_practice, now_stamp, parse_date,
    refresh_final_grade, require_user_with_role, rubric_scores, tx_err, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

impl EvaluationLedger for Connection {
    fn has_existing_evaluation(
        &self,
        jury_id: &str,
        practice_id: &str,
    ) -> Result<bool, ScoreError> {
        let hit = self
            .query_row(
                "SELECT 1 FROM jury_evaluations WHERE jury_id = ? AND practice_id = ?",
                [jury_id, practice_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }
}

fn is_assigned(conn: &Connection, practice_id: &str, jury_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM jury_assignments WHERE practice_id = ? AND jury_id = ?",
        [practice_id, jury_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query_err)
}

fn jury_assign(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let jury_id = get_required_str(params, "juryId")?;
    let assigned_on = match get_optional_str(params, "assignedOn")? {
        Some(raw) => parse_date(&raw, "assignedOn")?,
        None => chrono::Local::now().date_naive(),
    };

    let practice = load_open_practice(conn, &practice_id)?;
    if practice.jury_grade.is_some() {
        return Err(ScoreError::AlreadyEvaluated.into());
    }
    let jury = require_user_with_role(conn, &jury_id, Role::Jury)?;

    conn.execute(
        "INSERT INTO jury_assignments(practice_id, jury_id, assigned_on) VALUES(?, ?, ?)",
        (&practice_id, &jury_id, assigned_on.to_string()),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("duplicate_assignment", "jury member is already assigned")
                .with_details(json!({ "practiceId": practice_id, "juryId": jury_id }))
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "jury_assignments" }))
        }
    })?;
    info!(practice = %practice_id, jury = %jury_id, "jury member assigned");
    Ok(json!({
        "practiceId": practice_id,
        "juryId": jury.id,
        "juryName": jury.display_name(),
        "assignedOn": assigned_on.to_string(),
    }))
}

fn jury_assignments(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let mut stmt = conn
        .prepare(
            "SELECT ja.jury_id, u.first_name, u.last_name, ja.assigned_on,
                    (SELECT e.grade FROM jury_evaluations e
                      WHERE e.practice_id = ja.practice_id AND e.jury_id = ja.jury_id)
             FROM jury_assignments ja
             JOIN users u ON u.id = ja.jury_id
             WHERE ja.practice_id = ?
             ORDER BY ja.assigned_on, u.last_name, u.first_name",
        )
        .map_err(db_query_err)?;
    let rows = stmt
        .query_map([&practice_id], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            let grade: Option<f64> = r.get(4)?;
            Ok(json!({
                "juryId": r.get::<_, String>(0)?,
                "juryName": format!("{} {}", first, last),
                "assignedOn": r.get::<_, String>(3)?,
                "evaluated": grade.is_some(),
                "grade": grade,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    Ok(json!({ "practiceId": practice_id, "assignments": rows }))
}

fn jury_has_evaluation(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let jury_id = get_required_str(params, "juryId")?;
    let practice_id = get_required_str(params, "practiceId")?;
    let exists = conn.has_existing_evaluation(&jury_id, &practice_id)?;
    Ok(json!({ "exists": exists }))
}

fn parse_scores(params: &Value) -> Result<JuryRubric, HandlerErr> {
    let Some(scores) = params.get("scores").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("scores must be an object"));
    };
    let [pr, th, pc, at] =
        rubric_scores(scores, ["presentation", "theory", "practical", "attitude"])?;
    Ok(JuryRubric::new(pr, th, pc, at)?)
}

fn jury_evaluate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let jury_id = get_required_str(params, "juryId")?;
    let scores = parse_scores(params)?;
    let remarks = get_optional_str(params, "remarks")?.unwrap_or_default();

    load_open_practice(conn, &practice_id)?;
    if !is_assigned(conn, &practice_id, &jury_id)? {
        return Err(HandlerErr::new(
            "not_assigned",
            "jury member is not assigned to this practice",
        )
        .with_details(json!({ "practiceId": practice_id, "juryId": jury_id })));
    }
    let evaluation = calc::submit_jury_evaluation(conn, &jury_id, &practice_id, scores, &remarks)?;
    let cfg = load_grading_config(conn)?;

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute(
        "INSERT INTO jury_evaluations(
            id, practice_id, jury_id, presentation, theory, practical, attitude,
            grade, remarks, evaluated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &practice_id,
            &jury_id,
            evaluation.scores.presentation,
            evaluation.scores.theory,
            evaluation.scores.practical,
            evaluation.scores.attitude,
            evaluation.grade,
            &evaluation.remarks,
            now_stamp(),
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::from(ScoreError::DuplicateEvaluation {
                jury_id: jury_id.clone(),
                practice_id: practice_id.clone(),
            })
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "jury_evaluations" }))
        }
    })?;

    let assigned: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM jury_assignments WHERE practice_id = ?",
            [&practice_id],
            |r| r.get(0),
        )
        .map_err(db_query_err)?;
    let grades: Vec<f64> = {
        let mut stmt = tx
            .prepare("SELECT grade FROM jury_evaluations WHERE practice_id = ?")
            .map_err(db_query_err)?;
        let collected = stmt
            .query_map([&practice_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<f64>, _>>())
            .map_err(db_query_err)?;
        collected
    };
    let jury_grade = calc::aggregate_jury_grades(&grades, assigned.max(0) as usize);
    let final_grade = match jury_grade {
        Some(g) => {
            tx.execute(
                "UPDATE practices SET jury_grade = ? WHERE id = ?",
                (g, &practice_id),
            )
            .map_err(db_update_err("practices"))?;
            info!(practice = %practice_id, jury_grade = g, "jury grade set");
            Some(refresh_final_grade(&tx, &practice_id, &cfg)?)
        }
        None => None,
    };
    tx.commit().map_err(commit_err)?;

    info!(practice = %practice_id, jury = %jury_id, grade = evaluation.grade, "jury evaluation recorded");
    Ok(json!({
        "evaluation": evaluation,
        "evaluatedCount": grades.len(),
        "assignedCount": assigned,
        "juryGrade": jury_grade,
        "finalGrade": final_grade,
    }))
}

fn jury_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_optional_str(params, "practiceId")?;
    let jury_id = get_optional_str(params, "juryId")?;
    if practice_id.is_none() && jury_id.is_none() {
        return Err(HandlerErr::bad_params("practiceId or juryId is required"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT practice_id, jury_id, presentation, theory, practical, attitude,
                    grade, remarks, evaluated_at
             FROM jury_evaluations
             WHERE (?1 IS NULL OR practice_id = ?1)
               AND (?2 IS NULL OR jury_id = ?2)
             ORDER BY evaluated_at",
        )
        .map_err(db_query_err)?;
    let rows = stmt
        .query_map((&practice_id, &jury_id), |r| {
            Ok(json!({
                "practiceId": r.get::<_, String>(0)?,
                "juryId": r.get::<_, String>(1)?,
                "scores": {
                    "presentation": r.get::<_, f64>(2)?,
                    "theory": r.get::<_, f64>(3)?,
                    "practical": r.get::<_, f64>(4)?,
                    "attitude": r.get::<_, f64>(5)?,
                },
                "grade": r.get::<_, f64>(6)?,
                "remarks": r.get::<_, String>(7)?,
                "evaluatedAt": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    Ok(json!({ "evaluations": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "jury.assign" => Some(with_db(state, req, jury_assign)),
        "jury.assignments" => Some(with_db(state, req, jury_assignments)),
        "jury.hasEvaluation" => Some(with_db(state, req, jury_has_evaluation)),
        "jury.evaluate" => Some(with_db(state, req, jury_evaluate)),
        "jury.list" => Some(with_db(state, req, jury_list)),
        _ => None,
    }
}
