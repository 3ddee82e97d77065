use crate::calc::{self, AttendanceRubric, FinalGrade, GradingConfig, JuryRubric};
use crate::ipc::helpers::{
    criteria_map, get_optional_f64, rubric_scores, without_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn daily_score(params: &Value) -> Result<Value, HandlerErr> {
    let map = params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    let rubric = AttendanceRubric::from_criteria(&criteria_map(map))?;
    Ok(json!({ "score": calc::compute_daily_score(&rubric) }))
}

fn jury_grade(params: &Value) -> Result<Value, HandlerErr> {
    let [pr, th, pc, at] =
        rubric_scores(params, ["presentation", "theory", "practical", "attitude"])?;
    let rubric = JuryRubric::new(pr, th, pc, at)?;
    Ok(json!({ "grade": calc::compute_jury_grade(&rubric) }))
}

fn final_grade(params: &Value) -> Result<Value, HandlerErr> {
    let grade = calc::compute_final_grade(
        get_optional_f64(params, "attendance")?,
        get_optional_f64(params, "jury")?,
        get_optional_f64(params, "report")?,
    )?;
    let band = match grade {
        FinalGrade::Graded(v) => Some(GradingConfig::default().band(v)),
        FinalGrade::Pending => None,
    };
    Ok(json!({ "finalGrade": grade, "band": band }))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scoring.dailyScore" => Some(without_db(req, daily_score)),
        "scoring.juryGrade" => Some(without_db(req, jury_grade)),
        "scoring.finalGrade" => Some(without_db(req, final_grade)),
        _ => None,
    }
}
