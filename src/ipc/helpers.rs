use crate::calc::{FinalGrade, GradingConfig, ScoreError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{PracticeState, Role};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ScoreError> for HandlerErr {
    fn from(e: ScoreError) -> Self {
        let details = match &e {
            ScoreError::InvalidScoreRange { field, value }
            | ScoreError::NotWholeScore { field, value } => {
                Some(json!({ "field": field, "value": value }))
            }
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn db_query_err(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn db_insert_err(table: &str) -> impl Fn(rusqlite::Error) -> HandlerErr + '_ {
    move |e| HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": table }))
}

pub fn db_update_err(table: &str) -> impl Fn(rusqlite::Error) -> HandlerErr + '_ {
    move |e| HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
}

pub fn db_delete_err(table: &str) -> impl Fn(rusqlite::Error) -> HandlerErr + '_ {
    move |e| HandlerErr::new("db_delete_failed", e.to_string()).with_details(json!({ "table": table }))
}

pub fn tx_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_tx_failed", e.to_string())
}

pub fn commit_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_commit_failed", e.to_string())
}

/// Wraps a handler outcome in the response envelope, logging rejections.
pub fn respond(req: &Request, outcome: Result<Value, HandlerErr>) -> Value {
    match outcome {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            warn!(method = %req.method, code = error.code, "{}", error.message);
            error.response(&req.id)
        }
    }
}

/// Runs `op` against the open workspace database and wraps the outcome in a response.
pub fn with_db<F>(state: &mut AppState, req: &Request, op: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, op(conn, &req.params))
}

/// Like [`with_db`] for operations that also touch files inside the workspace.
pub fn with_workspace<F>(state: &mut AppState, req: &Request, op: F) -> Value
where
    F: FnOnce(&Connection, &Path, &Value) -> Result<Value, HandlerErr>,
{
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_deref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, op(conn, workspace, &req.params))
}

/// For handlers that need no workspace at all.
pub fn without_db<F>(req: &Request, op: F) -> Value
where
    F: FnOnce(&Value) -> Result<Value, HandlerErr>,
{
    respond(req, op(&req.params))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Required, trimmed, non-empty string.
pub fn get_required_text(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let t = raw.trim();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t.to_string())
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    get_optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

/// Reads named rubric scores from an object, in order. Missing names are reported as
/// incomplete criteria, extra keys as unknown ones, and non-numeric values fail the range check.
pub fn rubric_scores<const N: usize>(
    scores: &Value,
    names: [&'static str; N],
) -> Result<[f64; N], ScoreError> {
    if let Some(unknown) = scores
        .as_object()
        .and_then(|map| map.keys().find(|k| !names.contains(&k.as_str())))
    {
        return Err(ScoreError::UnknownCriterion(unknown.clone()));
    }
    let mut out = [0.0_f64; N];
    for (slot, name) in out.iter_mut().zip(names) {
        let raw = scores.get(name).ok_or(ScoreError::IncompleteCriteria(name))?;
        *slot = raw.as_f64().unwrap_or(f64::NAN);
    }
    Ok(out)
}

/// Keyed criteria from an object. Non-numeric values become NaN so they fail the range check
/// with the field name.
pub fn criteria_map(map: &Map<String, Value>) -> BTreeMap<String, f64> {
    map.iter()
        .map(|(k, v)| (k.clone(), v.as_f64().unwrap_or(f64::NAN)))
        .collect()
}

pub fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?, key)
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl UserRow {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "displayName": self.display_name(),
            "role": self.role.as_str(),
            "phone": self.phone,
            "address": self.address,
        })
    }
}

pub const USER_COLUMNS: &str = "id, username, first_name, last_name, role, phone, address";

pub fn user_from_row(r: &Row) -> rusqlite::Result<UserRow> {
    let role_raw: String = r.get(4)?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(4, "role".into(), Type::Text))?;
    Ok(UserRow {
        id: r.get(0)?,
        username: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        role,
        phone: r.get(5)?,
        address: r.get(6)?,
    })
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<UserRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(db_query_err)?
    .ok_or_else(|| HandlerErr::not_found("user not found").with_details(json!({ "userId": user_id })))
}

/// Loads a user and insists on a role, e.g. a practice's student must be a STUDENT.
pub fn require_user_with_role(
    conn: &Connection,
    user_id: &str,
    role: Role,
) -> Result<UserRow, HandlerErr> {
    let user = load_user(conn, user_id)?;
    if user.role != role {
        return Err(HandlerErr::new(
            "invalid_role",
            format!("user must have role {}", role.as_str()),
        )
        .with_details(json!({ "userId": user_id, "role": user.role.as_str() })));
    }
    Ok(user)
}

// ---------------------------------------------------------------------------
// Practices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PracticeRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub module_id: String,
    pub module_name: String,
    pub module_kind: String,
    pub supervisor_id: Option<String>,
    pub state: PracticeState,
    pub start_date: String,
    pub end_date: String,
    pub attendance_grade: Option<f64>,
    pub jury_grade: Option<f64>,
    pub report_grade: Option<f64>,
    pub final_grade: Option<f64>,
    pub attendance_closed: bool,
    pub created_at: String,
    pub evaluated_at: Option<String>,
}

pub const PRACTICE_SELECT: &str = "SELECT
       p.id, p.student_id, s.first_name, s.last_name, p.module_id, m.name, m.kind,
       p.supervisor_id, p.state, p.start_date, p.end_date,
       p.attendance_grade, p.jury_grade, p.report_grade, p.final_grade,
       p.attendance_closed, p.created_at, p.evaluated_at
     FROM practices p
     JOIN users s ON s.id = p.student_id
     JOIN modules m ON m.id = p.module_id";

pub fn practice_from_row(r: &Row) -> rusqlite::Result<PracticeRow> {
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    let state_raw: String = r.get(8)?;
    let state = PracticeState::parse(&state_raw)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(8, "state".into(), Type::Text))?;
    Ok(PracticeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: format!("{} {}", first, last),
        module_id: r.get(4)?,
        module_name: r.get(5)?,
        module_kind: r.get(6)?,
        supervisor_id: r.get(7)?,
        state,
        start_date: r.get(9)?,
        end_date: r.get(10)?,
        attendance_grade: r.get(11)?,
        jury_grade: r.get(12)?,
        report_grade: r.get(13)?,
        final_grade: r.get(14)?,
        attendance_closed: r.get::<_, i64>(15)? != 0,
        created_at: r.get(16)?,
        evaluated_at: r.get(17)?,
    })
}

impl PracticeRow {
    pub fn final_grade(&self) -> FinalGrade {
        match self.final_grade {
            Some(v) => FinalGrade::Graded(v),
            None => FinalGrade::Pending,
        }
    }

    pub fn to_json(&self, cfg: &GradingConfig) -> Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "moduleId": self.module_id,
            "moduleName": self.module_name,
            "moduleKind": self.module_kind,
            "supervisorId": self.supervisor_id,
            "state": self.state.as_str(),
            "startDate": self.start_date,
            "endDate": self.end_date,
            "grades": {
                "attendance": self.attendance_grade,
                "jury": self.jury_grade,
                "report": self.report_grade,
            },
            "finalGrade": self.final_grade(),
            "band": self.final_grade.map(|v| cfg.band(v)),
            "attendanceClosed": self.attendance_closed,
            "createdAt": self.created_at,
            "evaluatedAt": self.evaluated_at,
        })
    }
}

pub fn load_practice(conn: &Connection, practice_id: &str) -> Result<PracticeRow, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE p.id = ?", PRACTICE_SELECT),
        [practice_id],
        practice_from_row,
    )
    .optional()
    .map_err(db_query_err)?
    .ok_or_else(|| {
        HandlerErr::not_found("practice not found")
            .with_details(json!({ "practiceId": practice_id }))
    })
}

/// Loads a practice that can still receive component grades.
pub fn load_open_practice(conn: &Connection, practice_id: &str) -> Result<PracticeRow, HandlerErr> {
    let practice = load_practice(conn, practice_id)?;
    if practice.state == PracticeState::Evaluated {
        return Err(HandlerErr::new(
            "practice_evaluated",
            "practice has already been evaluated",
        )
        .with_details(json!({ "practiceId": practice_id })));
    }
    Ok(practice)
}

pub fn move_practice_state(
    conn: &Connection,
    practice: &PracticeRow,
    next: PracticeState,
) -> Result<(), HandlerErr> {
    if practice.state == next {
        return Ok(());
    }
    if !practice.state.can_move_to(next) {
        return Err(HandlerErr::new(
            "invalid_state",
            format!(
                "cannot move practice from {} to {}",
                practice.state.as_str(),
                next.as_str()
            ),
        ));
    }
    conn.execute(
        "UPDATE practices SET state = ? WHERE id = ?",
        (next.as_str(), &practice.id),
    )
    .map_err(db_update_err("practices"))?;
    info!(
        practice = %practice.id,
        from = practice.state.as_str(),
        to = next.as_str(),
        "practice state changed"
    );
    Ok(())
}

/// Recomputes the final grade from the stored component grades. The practice becomes
/// EVALUATED in the same step the final grade becomes known.
pub fn refresh_final_grade(
    conn: &Connection,
    practice_id: &str,
    cfg: &GradingConfig,
) -> Result<FinalGrade, HandlerErr> {
    let practice = load_practice(conn, practice_id)?;
    if practice.final_grade.is_some() {
        return Ok(practice.final_grade());
    }
    let outcome = cfg.final_grade(
        practice.attendance_grade,
        practice.jury_grade,
        practice.report_grade,
    )?;
    if let FinalGrade::Graded(v) = outcome {
        conn.execute(
            "UPDATE practices SET final_grade = ?, evaluated_at = ? WHERE id = ?",
            (v, now_stamp(), practice_id),
        )
        .map_err(db_update_err("practices"))?;
        move_practice_state(conn, &practice, PracticeState::Evaluated)?;
        info!(practice = %practice_id, final_grade = v, "final grade computed");
    }
    Ok(outcome)
}

/// Grading settings in force. A stored section that cannot be used fails with
/// `invalid_settings` rather than silently grading with defaults.
pub fn load_grading_config(conn: &Connection) -> Result<GradingConfig, HandlerErr> {
    match crate::db::settings_get_json(conn, crate::calc::GRADING_SETTINGS_KEY) {
        Ok(Some(v)) => Ok(crate::calc::grading_config_from_value(v)?),
        Ok(None) => Ok(GradingConfig::default()),
        Err(e) => Err(db_query_err(format!("{e:#}"))),
    }
}
