use crate::ipc::helpers::{
    commit_err, db_delete_err, db_insert_err, db_query_err, db_update_err, get_optional_str,
    get_required_str, get_required_text, is_unique_violation, parse_date,
    require_user_with_role, tx_err, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{ModuleKind, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ModuleRow {
    id: String,
    name: String,
    description: String,
    kind: String,
    practice_count: i64,
}

impl ModuleRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "kind": self.kind,
            "practiceCount": self.practice_count,
        })
    }
}

const MODULE_SELECT: &str = "SELECT
       m.id, m.name, m.description, m.kind,
       (SELECT COUNT(*) FROM practices p WHERE p.module_id = m.id) AS practice_count
     FROM modules m";

fn module_from_row(r: &rusqlite::Row) -> rusqlite::Result<ModuleRow> {
    Ok(ModuleRow {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        kind: r.get(3)?,
        practice_count: r.get(4)?,
    })
}

fn parse_kind(raw: &str) -> Result<ModuleKind, HandlerErr> {
    ModuleKind::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("kind must be MODULE_1, MODULE_2 or MODULE_3")
            .with_details(json!({ "kind": raw }))
    })
}

fn load_module(conn: &Connection, module_id: &str) -> Result<ModuleRow, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE m.id = ?", MODULE_SELECT),
        [module_id],
        module_from_row,
    )
    .optional()
    .map_err(db_query_err)?
    .ok_or_else(|| {
        HandlerErr::not_found("module not found").with_details(json!({ "moduleId": module_id }))
    })
}

fn modules_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_text(params, "name")?;
    let description = get_required_str(params, "description")?;
    let kind = parse_kind(&get_required_str(params, "kind")?)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO modules(id, name, description, kind) VALUES(?, ?, ?, ?)",
        (&id, &name, description.trim(), kind.as_str()),
    )
    .map_err(db_insert_err("modules"))?;
    Ok(json!({ "moduleId": id }))
}

fn modules_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY m.kind, m.name", MODULE_SELECT))
        .map_err(db_query_err)?;
    let modules = stmt
        .query_map([], module_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    let modules_json: Vec<Value> = modules.iter().map(|m| m.to_json()).collect();
    Ok(json!({ "modules": modules_json }))
}

fn modules_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    Ok(load_module(conn, &module_id)?.to_json())
}

fn modules_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    let mut module = load_module(conn, &module_id)?;
    if params.get("name").is_some() {
        module.name = get_required_text(params, "name")?;
    }
    if params.get("description").is_some() {
        module.description = get_required_str(params, "description")?.trim().to_string();
    }
    if params.get("kind").is_some() {
        module.kind = parse_kind(&get_required_str(params, "kind")?)?
            .as_str()
            .to_string();
    }
    conn.execute(
        "UPDATE modules SET name = ?, description = ?, kind = ? WHERE id = ?",
        (&module.name, &module.description, &module.kind, &module.id),
    )
    .map_err(db_update_err("modules"))?;
    Ok(module.to_json())
}

fn modules_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    let module = load_module(conn, &module_id)?;
    if module.practice_count > 0 {
        return Err(HandlerErr::new("in_use", "module still has practices")
            .with_details(json!({ "practiceCount": module.practice_count })));
    }
    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute("DELETE FROM teacher_assignments WHERE module_id = ?", [&module_id])
        .map_err(db_delete_err("teacher_assignments"))?;
    tx.execute("DELETE FROM modules WHERE id = ?", [&module_id])
        .map_err(db_delete_err("modules"))?;
    tx.commit().map_err(commit_err)?;
    Ok(json!({ "ok": true }))
}

fn modules_assign_teacher(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let assigned_on = match get_optional_str(params, "assignedOn")? {
        Some(raw) => parse_date(&raw, "assignedOn")?,
        None => chrono::Local::now().date_naive(),
    };
    let module = load_module(conn, &module_id)?;
    let teacher = require_user_with_role(conn, &teacher_id, Role::Teacher)?;

    conn.execute(
        "INSERT INTO teacher_assignments(module_id, teacher_id, assigned_on) VALUES(?, ?, ?)",
        (&module.id, &teacher.id, assigned_on.to_string()),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new("duplicate_assignment", "teacher is already assigned to this module")
                .with_details(json!({ "moduleId": module_id, "teacherId": teacher_id }))
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "teacher_assignments" }))
        }
    })?;
    info!(module = %module.id, teacher = %teacher.id, "teacher assigned to module");
    Ok(json!({
        "moduleId": module.id,
        "teacherId": teacher.id,
        "teacherName": teacher.display_name(),
        "assignedOn": assigned_on.to_string(),
    }))
}

fn modules_assignments(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    let module = load_module(conn, &module_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT ta.teacher_id, u.first_name, u.last_name, ta.assigned_on
             FROM teacher_assignments ta
             JOIN users u ON u.id = ta.teacher_id
             WHERE ta.module_id = ?
             ORDER BY ta.assigned_on, u.last_name, u.first_name",
        )
        .map_err(db_query_err)?;
    let rows = stmt
        .query_map([&module.id], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "teacherId": r.get::<_, String>(0)?,
                "teacherName": format!("{} {}", first, last),
                "assignedOn": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    Ok(json!({ "moduleId": module.id, "teachers": rows }))
}

/// Every jury assignment on the module's practices, one row per (practice, jury member).
fn modules_juries(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    let module = load_module(conn, &module_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT ja.practice_id, s.first_name, s.last_name,
                    ja.jury_id, j.first_name, j.last_name, ja.assigned_on,
                    EXISTS (SELECT 1 FROM jury_evaluations e
                             WHERE e.practice_id = ja.practice_id AND e.jury_id = ja.jury_id)
             FROM jury_assignments ja
             JOIN practices p ON p.id = ja.practice_id
             JOIN users s ON s.id = p.student_id
             JOIN users j ON j.id = ja.jury_id
             WHERE p.module_id = ?
             ORDER BY s.last_name, s.first_name, j.last_name, j.first_name",
        )
        .map_err(db_query_err)?;
    let rows = stmt
        .query_map([&module.id], |r| {
            let student = format!("{} {}", r.get::<_, String>(1)?, r.get::<_, String>(2)?);
            let jury = format!("{} {}", r.get::<_, String>(4)?, r.get::<_, String>(5)?);
            Ok(json!({
                "practiceId": r.get::<_, String>(0)?,
                "studentName": student,
                "juryId": r.get::<_, String>(3)?,
                "juryName": jury,
                "assignedOn": r.get::<_, String>(6)?,
                "evaluated": r.get::<_, i64>(7)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;
    Ok(json!({ "moduleId": module.id, "juries": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "modules.create" => Some(with_db(state, req, modules_create)),
        "modules.list" => Some(with_db(state, req, modules_list)),
        "modules.get" => Some(with_db(state, req, modules_get)),
        "modules.update" => Some(with_db(state, req, modules_update)),
        "modules.delete" => Some(with_db(state, req, modules_delete)),
        "modules.assignTeacher" => Some(with_db(state, req, modules_assign_teacher)),
        "modules.assignments" => Some(with_db(state, req, modules_assignments)),
        "modules.juries" => Some(with_db(state, req, modules_juries)),
        _ => None,
    }
}
