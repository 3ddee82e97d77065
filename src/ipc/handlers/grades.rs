use crate::calc::GradeBand;
use crate::ipc::helpers::{
    db_query_err, get_optional_str, get_required_str, load_grading_config, load_practice,
    practice_from_row, with_db, HandlerErr, PRACTICE_SELECT,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn grades_final(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let practice_id = get_required_str(params, "practiceId")?;
    let practice = load_practice(conn, &practice_id)?;
    let cfg = load_grading_config(conn)?;
    let missing: Vec<&str> = [
        ("attendance", practice.attendance_grade),
        ("jury", practice.jury_grade),
        ("report", practice.report_grade),
    ]
    .iter()
    .filter(|(_, v)| v.is_none())
    .map(|(name, _)| *name)
    .collect();
    Ok(json!({
        "practiceId": practice.id,
        "studentName": practice.student_name,
        "state": practice.state.as_str(),
        "components": {
            "attendance": practice.attendance_grade,
            "jury": practice.jury_grade,
            "report": practice.report_grade,
        },
        "missing": missing,
        "weights": cfg.weights,
        "finalGrade": practice.final_grade(),
        "band": practice.final_grade.map(|v| cfg.band(v)),
        "evaluatedAt": practice.evaluated_at,
    }))
}

fn grades_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let module_id = get_optional_str(params, "moduleId")?;
    let cfg = load_grading_config(conn)?;
    let mut stmt = conn
        .prepare(&format!(
            "{} WHERE (?1 IS NULL OR p.module_id = ?1) ORDER BY s.last_name, s.first_name",
            PRACTICE_SELECT
        ))
        .map_err(db_query_err)?;
    let practices = stmt
        .query_map([&module_id], practice_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query_err)?;

    let mut bands: BTreeMap<GradeBand, usize> = BTreeMap::new();
    let mut pending = 0usize;
    let mut rows = Vec::with_capacity(practices.len());
    for p in &practices {
        match p.final_grade {
            Some(v) => *bands.entry(cfg.band(v)).or_default() += 1,
            None => pending += 1,
        }
        rows.push(json!({
            "practiceId": p.id,
            "studentName": p.student_name,
            "moduleName": p.module_name,
            "state": p.state.as_str(),
            "finalGrade": p.final_grade(),
            "band": p.final_grade.map(|v| cfg.band(v)),
        }));
    }
    let count = |b: GradeBand| bands.get(&b).copied().unwrap_or(0);
    Ok(json!({
        "rows": rows,
        "counts": {
            "OUTSTANDING": count(GradeBand::Outstanding),
            "PASSING": count(GradeBand::Passing),
            "FAILING": count(GradeBand::Failing),
            "PENDING": pending,
        },
        "total": practices.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.final" => Some(with_db(state, req, grades_final)),
        "grades.summary" => Some(with_db(state, req, grades_summary)),
        _ => None,
    }
}
