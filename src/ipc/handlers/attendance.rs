use crate::calc::{self, AttendanceRubric, GeneralScoreMode, ScoreError};
use crate::ipc::helpers::{
    commit_err, criteria_map, db_query_err, db_update_err, get_required_date, get_required_str,
    is_unique_violation, load_grading_config, load_open_practice, load_practice,
    move_practice_state, now_stamp, refresh_final_grade, tx_err, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceStatus, PracticeState, Punctuality};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct AttendanceRow {
    id: String,
    session_date: String,
    status: String,
    punctuality: String,
    rubric: Option<AttendanceRubric>,
    daily_score: f64,
    general_score: f64,
    recorded_at: String,
}

impl AttendanceRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "date": self.session_date,
            "status": self.status,
            "punctuality": self.punctuality,
            "criteria": self.rubric,
            "dailyScore": self.daily_score,
            "generalScore": self.general_score,
            "recordedAt": self.recorded_at,
        })
    }
}

fn list_records(conn: &Connection, practice_id: &str) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, session_date, status, punctuality, conceptual, procedural, attitudinal,
                    daily_score, general_score, recorded_at
             FROM attendance_records
             WHERE practice_id = ?
             ORDER BY session_date",
        )
        .map_err(db_query_err)?;
    stmt.query_map([practice_id], |r| {
        let c: Option<u8> = r.get(4)?;
        let p: Option<u8> = r.get(5)?;
        let a: Option<u8> = r.get(6)?;
        let rubric = match (c, p, a) {
            (Some(conceptual), Some(procedural), Some(attitudinal)) => Some(AttendanceRubric {
                conceptual,
                procedural,
                attitudinal,
            }),
            _ => None,
        };
        Ok(AttendanceRow {
            id: r.get(0)?,
            session_date: r.get(1)?,
            status: r.get(2)?,
            punctuality: r.get(3)?,
            rubric,
            daily_score: r.get(7)?,
            general_score: r.get(8)?,
            recorded_at: r.get(9)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query_err)
}

fn parse_criteria(params: &Value) -> Result<Option<BTreeMap<String, f64>>, HandlerErr> {
    match params.get("criteria") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(criteria_map(map))),
        Some(_) => Err(HandlerErr::bad_params("criteria must be an object")),
    }
}

/// Rewrites the running general score of every session in date order.
fn restate_general_scores(
    conn: &Connection,
    practice_id: &str,
    mode: GeneralScoreMode,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let mut rows = list_records(conn, practice_id)?;
    let mut dailies: Vec<f64> = Vec::with_capacity(rows.len());
    for row in rows.iter_mut() {
        dailies.push(row.daily_score);
        let general = calc::general_score(mode, &dailies).unwrap_or(0.0);
        if general != row.general_score {
            conn.execute(
                "UPDATE attendance_records SET general_score = ? WHERE id = ?",
                (general, &row.id),
            )
            .map_err(db_update_err("attendance_records"))?;
            row.general_score = general;
        }
    }
    Ok(rows)
}

fn attendance_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let date = get_required_date(params, "date")?.to_string();
    let status_raw = get_required_str(params, "status")?;
    let status = AttendanceStatus::parse(&status_raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be PRESENT or ABSENT")
            .with_details(json!({ "status": status_raw }))
    })?;
    let punctuality_raw = get_required_str(params, "punctuality")?;
    let punctuality = Punctuality::parse(&punctuality_raw).ok_or_else(|| {
        HandlerErr::bad_params("punctuality must be ON_TIME or LATE")
            .with_details(json!({ "punctuality": punctuality_raw }))
    })?;
    let criteria = parse_criteria(params)?;

    let rubric = match (status, criteria) {
        (AttendanceStatus::Present, Some(c)) => Some(AttendanceRubric::from_criteria(&c)?),
        (AttendanceStatus::Absent, Some(c)) if !c.is_empty() => {
            return Err(ScoreError::AbsentWithScores.into())
        }
        _ => None,
    };
    let daily = calc::compute_session_score(status == AttendanceStatus::Present, rubric.as_ref())?;

    let practice = load_open_practice(conn, &practice_id)?;
    if practice.attendance_closed {
        return Err(HandlerErr::new("attendance_closed", "attendance is already closed")
            .with_details(json!({ "practiceId": practice_id })));
    }
    let cfg = load_grading_config(conn)?;

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO attendance_records(
            id, practice_id, session_date, status, punctuality,
            conceptual, procedural, attitudinal, daily_score, general_score, recorded_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &practice_id,
            &date,
            status.as_str(),
            punctuality.as_str(),
            rubric.map(|r| r.conceptual),
            rubric.map(|r| r.procedural),
            rubric.map(|r| r.attitudinal),
            daily,
            daily,
            now_stamp(),
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("duplicate_session", "a session is already recorded for this date")
                .with_details(json!({ "practiceId": practice_id, "date": date }))
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "attendance_records" }))
        }
    })?;
    let rows = restate_general_scores(&tx, &practice_id, cfg.general_score_mode)?;
    if practice.state == PracticeState::Pending {
        move_practice_state(&tx, &practice, PracticeState::InProgress)?;
    }
    tx.commit().map_err(commit_err)?;

    let row = rows
        .iter()
        .find(|r| r.id == id)
        .ok_or_else(|| HandlerErr::new("db_query_failed", "recorded session not found"))?;
    info!(
        practice = %practice_id,
        date = %date,
        daily_score = daily,
        general_score = row.general_score,
        "attendance recorded"
    );
    Ok(row.to_json())
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let practice = load_practice(conn, &practice_id)?;
    let rows = list_records(conn, &practice_id)?;
    let records: Vec<Value> = rows.iter().map(|r| r.to_json()).collect();
    Ok(json!({
        "practiceId": practice_id,
        "records": records,
        "generalScore": rows.last().map(|r| r.general_score),
        "closed": practice.attendance_closed,
        "attendanceGrade": practice.attendance_grade,
    }))
}

fn attendance_close(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let practice = load_open_practice(conn, &practice_id)?;
    if practice.attendance_closed {
        return Err(ScoreError::AlreadyEvaluated.into());
    }
    let cfg = load_grading_config(conn)?;
    let rows = list_records(conn, &practice_id)?;
    let dailies: Vec<f64> = rows.iter().map(|r| r.daily_score).collect();
    let Some(grade) = calc::general_score(cfg.general_score_mode, &dailies) else {
        return Err(HandlerErr::new("no_sessions", "no attendance has been recorded")
            .with_details(json!({ "practiceId": practice_id })));
    };

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute(
        "UPDATE practices SET attendance_grade = ?, attendance_closed = 1 WHERE id = ?",
        (grade, &practice_id),
    )
    .map_err(db_update_err("practices"))?;
    let final_grade = refresh_final_grade(&tx, &practice_id, &cfg)?;
    tx.commit().map_err(commit_err)?;

    info!(practice = %practice_id, attendance_grade = grade, "attendance closed");
    Ok(json!({
        "practiceId": practice_id,
        "attendanceGrade": grade,
        "sessions": rows.len(),
        "finalGrade": final_grade,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(with_db(state, req, attendance_record)),
        "attendance.list" => Some(with_db(state, req, attendance_list)),
        "attendance.close" => Some(with_db(state, req, attendance_close)),
        _ => None,
    }
}
