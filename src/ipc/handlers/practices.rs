use crate::documents;
use crate::ipc::helpers::{
    commit_err, db_delete_err, db_insert_err, db_query_err, db_update_err, get_optional_str,
    get_required_date, get_required_str, load_grading_config, load_open_practice, load_practice,
    load_user, move_practice_state, now_stamp, parse_date, practice_from_row,
    require_user_with_role, tx_err, with_db, with_workspace, HandlerErr, PRACTICE_SELECT,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{ModuleKind, PracticeScope, PracticeState, Role};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

fn practices_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let module_id = get_required_str(params, "moduleId")?;
    let supervisor_id = get_optional_str(params, "supervisorId")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not precede startDate")
            .with_details(json!({ "startDate": start.to_string(), "endDate": end.to_string() })));
    }

    require_user_with_role(conn, &student_id, Role::Student)?;
    if let Some(sup) = supervisor_id.as_deref() {
        require_user_with_role(conn, sup, Role::Teacher)?;
    }
    let module_exists = conn
        .query_row("SELECT 1 FROM modules WHERE id = ?", [&module_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_query_err)?
        .is_some();
    if !module_exists {
        return Err(HandlerErr::not_found("module not found")
            .with_details(json!({ "moduleId": module_id })));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO practices(id, student_id, module_id, supervisor_id, state, start_date, end_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &module_id,
            &supervisor_id,
            PracticeState::Pending.as_str(),
            start.to_string(),
            end.to_string(),
            now_stamp(),
        ),
    )
    .map_err(db_insert_err("practices"))?;
    info!(practice = %id, student = %student_id, "practice created");
    Ok(json!({ "practiceId": id, "state": PracticeState::Pending.as_str() }))
}

fn practices_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let cfg = load_grading_config(conn)?;
    Ok(load_practice(conn, &practice_id)?.to_json(&cfg))
}

fn practices_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if let Some(module_id) = get_optional_str(params, "moduleId")? {
        clauses.push("p.module_id = ?");
        args.push(module_id);
    }
    if let Some(raw) = get_optional_str(params, "moduleKind")? {
        let kind = ModuleKind::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("moduleKind must be MODULE_1, MODULE_2 or MODULE_3")
        })?;
        clauses.push("m.kind = ?");
        args.push(kind.as_str().to_string());
    }
    if let Some(raw) = get_optional_str(params, "state")? {
        let state = PracticeState::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("state must be PENDING, IN_PROGRESS or EVALUATED")
        })?;
        clauses.push("p.state = ?");
        args.push(state.as_str().to_string());
    }
    if let Some(viewer_id) = get_optional_str(params, "viewerId")? {
        let viewer = load_user(conn, &viewer_id)?;
        let clause = match viewer.role.practice_scope() {
            PracticeScope::OwnAsStudent => Some("p.student_id = ?"),
            PracticeScope::Supervised => Some("p.supervisor_id = ?"),
            PracticeScope::AssignedAsJury => Some(
                "EXISTS (SELECT 1 FROM jury_assignments ja
                         WHERE ja.practice_id = p.id AND ja.jury_id = ?)",
            ),
            PracticeScope::All => None,
        };
        if let Some(clause) = clause {
            clauses.push(clause);
            args.push(viewer.id);
        }
    }

    let mut sql = PRACTICE_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name, p.start_date");

    let mut stmt = conn.prepare(&sql).map_err(db_query_err)?;
    let mut practices = stmt
        .query_map(params_from_iter(args.iter()), practice_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    if let Some(search) = get_optional_str(params, "search")? {
        let needle = search.trim().to_lowercase();
        if !needle.is_empty() {
            practices.retain(|p| p.student_name.to_lowercase().contains(&needle));
        }
    }

    let cfg = load_grading_config(conn)?;
    let rows: Vec<Value> = practices.iter().map(|p| p.to_json(&cfg)).collect();
    Ok(json!({ "practices": rows }))
}

/// Edits the schedule and supervisor of a practice that has not been evaluated yet.
/// `supervisorId: null` clears the supervisor.
fn practices_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let practice = load_open_practice(conn, &practice_id)?;

    let start = match params.get("startDate") {
        Some(_) => get_required_date(params, "startDate")?,
        None => parse_date(&practice.start_date, "startDate")?,
    };
    let end = match params.get("endDate") {
        Some(_) => get_required_date(params, "endDate")?,
        None => parse_date(&practice.end_date, "endDate")?,
    };
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not precede startDate")
            .with_details(json!({ "startDate": start.to_string(), "endDate": end.to_string() })));
    }
    let supervisor_id = match params.get("supervisorId") {
        None => practice.supervisor_id.clone(),
        Some(_) => get_optional_str(params, "supervisorId")?,
    };
    if let Some(sup) = supervisor_id.as_deref() {
        require_user_with_role(conn, sup, Role::Teacher)?;
    }

    conn.execute(
        "UPDATE practices SET start_date = ?, end_date = ?, supervisor_id = ? WHERE id = ?",
        (start.to_string(), end.to_string(), &supervisor_id, &practice_id),
    )
    .map_err(db_update_err("practices"))?;
    info!(practice = %practice_id, "practice updated");
    let cfg = load_grading_config(conn)?;
    Ok(load_practice(conn, &practice_id)?.to_json(&cfg))
}

fn practices_start(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let practice = load_open_practice(conn, &practice_id)?;
    move_practice_state(conn, &practice, PracticeState::InProgress)?;
    Ok(json!({ "practiceId": practice_id, "state": PracticeState::InProgress.as_str() }))
}

fn practices_delete(
    conn: &Connection,
    workspace: &Path,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    load_open_practice(conn, &practice_id)?;

    let document: Option<String> = conn
        .query_row(
            "SELECT document_path FROM report_submissions WHERE practice_id = ?",
            [&practice_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query_err)?;

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    for table in [
        "attendance_records",
        "jury_evaluations",
        "jury_assignments",
        "report_submissions",
    ] {
        tx.execute(
            &format!("DELETE FROM {} WHERE practice_id = ?", table),
            [&practice_id],
        )
        .map_err(db_delete_err(table))?;
    }
    tx.execute("DELETE FROM practices WHERE id = ?", [&practice_id])
        .map_err(db_delete_err("practices"))?;
    tx.commit().map_err(commit_err)?;

    // Rows are committed at this point; a leftover file only warns.
    if let Some(rel) = document {
        if let Err(e) = documents::remove_document(workspace, &rel) {
            warn!(path = %rel, error = %e, "report document could not be removed");
        }
    }
    info!(practice = %practice_id, "practice deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "practices.create" => Some(with_db(state, req, practices_create)),
        "practices.get" => Some(with_db(state, req, practices_get)),
        "practices.list" => Some(with_db(state, req, practices_list)),
        "practices.update" => Some(with_db(state, req, practices_update)),
        "practices.start" => Some(with_db(state, req, practices_start)),
        "practices.delete" => Some(with_workspace(state, req, practices_delete)),
        _ => None,
    }
}
