use crate::calc::{self, ReportGrade, ScoreError};
use crate::documents;
use crate::ipc::helpers::{
    commit_err, db_delete_err, db_insert_err, db_query_err, db_update_err, get_optional_str,
    get_required_f64, get_required_str, get_required_text, load_grading_config,
    load_open_practice, load_practice, now_stamp, refresh_final_grade, tx_err, with_db,
    with_workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SubmissionRow {
    id: String,
    content: String,
    document_name: String,
    document_path: String,
    document_sha256: String,
    submitted_at: String,
    grade: Option<f64>,
    remarks: Option<String>,
    evaluated_at: Option<String>,
}

impl SubmissionRow {
    fn report_grade(&self) -> ReportGrade {
        ReportGrade {
            grade: self.grade,
            remarks: self.remarks.clone(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "content": self.content,
            "documentName": self.document_name,
            "documentPath": self.document_path,
            "documentSha256": self.document_sha256,
            "submittedAt": self.submitted_at,
            "grade": self.grade,
            "remarks": self.remarks,
            "evaluatedAt": self.evaluated_at,
        })
    }
}

fn load_submission(
    conn: &Connection,
    practice_id: &str,
) -> Result<Option<SubmissionRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, content, document_name, document_path, document_sha256, submitted_at,
                grade, remarks, evaluated_at
         FROM report_submissions
         WHERE practice_id = ?",
        [practice_id],
        |r| {
            Ok(SubmissionRow {
                id: r.get(0)?,
                content: r.get(1)?,
                document_name: r.get(2)?,
                document_path: r.get(3)?,
                document_sha256: r.get(4)?,
                submitted_at: r.get(5)?,
                grade: r.get(6)?,
                remarks: r.get(7)?,
                evaluated_at: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(db_query_err)
}

fn reports_submit(conn: &Connection, workspace: &Path, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let content = get_required_text(params, "content")?;
    let source = PathBuf::from(get_required_text(params, "documentPath")?);

    load_open_practice(conn, &practice_id)?;
    let previous = load_submission(conn, &practice_id)?;
    if previous.as_ref().is_some_and(|s| s.grade.is_some()) {
        return Err(ScoreError::AlreadyEvaluated.into());
    }

    let stored = documents::store_document(workspace, &source).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}"))
            .with_details(json!({ "documentPath": source.to_string_lossy() }))
    })?;

    let id = Uuid::new_v4().to_string();
    let submitted_at = now_stamp();
    let written = (|| -> Result<(), HandlerErr> {
        let tx = conn.unchecked_transaction().map_err(tx_err)?;
        tx.execute(
            "DELETE FROM report_submissions WHERE practice_id = ?",
            [&practice_id],
        )
        .map_err(db_delete_err("report_submissions"))?;
        tx.execute(
            "INSERT INTO report_submissions(
                id, practice_id, content, document_name, document_path, document_sha256, submitted_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &practice_id,
                &content,
                &stored.name,
                &stored.rel_path,
                &stored.sha256,
                &submitted_at,
            ),
        )
        .map_err(db_insert_err("report_submissions"))?;
        tx.commit().map_err(commit_err)
    })();
    if let Err(e) = written {
        let _ = documents::remove_document(workspace, &stored.rel_path);
        return Err(e);
    }

    if let Some(prev) = previous.as_ref() {
        if let Err(e) = documents::remove_document(workspace, &prev.document_path) {
            warn!(path = %prev.document_path, error = %e, "replaced report document could not be removed");
        }
    }
    info!(
        practice = %practice_id,
        sha256 = %stored.sha256,
        replaced = previous.is_some(),
        "report submitted"
    );
    Ok(json!({
        "submissionId": id,
        "documentName": stored.name,
        "documentPath": stored.rel_path,
        "documentSha256": stored.sha256,
        "submittedAt": submitted_at,
        "replaced": previous.is_some(),
    }))
}

fn reports_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    load_practice(conn, &practice_id)?;
    let submission = load_submission(conn, &practice_id)?;
    Ok(json!({
        "practiceId": practice_id,
        "submission": submission.map(|s| s.to_json()),
    }))
}

fn reports_evaluate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let grade = get_required_f64(params, "grade")?;
    let remarks = get_optional_str(params, "remarks")?.unwrap_or_default();

    load_open_practice(conn, &practice_id)?;
    let submission = load_submission(conn, &practice_id)?;
    let current = submission.as_ref().map(|s| s.report_grade());
    let evaluated = calc::evaluate_report(current.as_ref(), grade, &remarks)?;
    let Some(submission) = submission else {
        return Err(ScoreError::ReportNotSubmitted.into());
    };
    let cfg = load_grading_config(conn)?;

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute(
        "UPDATE report_submissions SET grade = ?, remarks = ?, evaluated_at = ? WHERE id = ?",
        (evaluated.grade, &evaluated.remarks, now_stamp(), &submission.id),
    )
    .map_err(db_update_err("report_submissions"))?;
    tx.execute(
        "UPDATE practices SET report_grade = ? WHERE id = ?",
        (evaluated.grade, &practice_id),
    )
    .map_err(db_update_err("practices"))?;
    let final_grade = refresh_final_grade(&tx, &practice_id, &cfg)?;
    tx.commit().map_err(commit_err)?;

    info!(practice = %practice_id, report_grade = evaluated.grade, "report graded");
    Ok(json!({
        "practiceId": practice_id,
        "grade": evaluated.grade,
        "remarks": evaluated.remarks,
        "finalGrade": final_grade,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.submit" => Some(with_workspace(state, req, reports_submit)),
        "reports.get" => Some(with_db(state, req, reports_get)),
        "reports.evaluate" => Some(with_db(state, req, reports_evaluate)),
        _ => None,
    }
}
