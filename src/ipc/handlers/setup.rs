use crate::calc::{GradingConfig, GRADING_SETTINGS_KEY};
use crate::db;
use crate::ipc::helpers::{
    db_query_err, get_optional_str, load_grading_config, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
}

impl SetupSection {
    const ALL: [SetupSection; 1] = [SetupSection::Grading];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => GRADING_SETTINGS_KEY,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => {
            serde_json::to_value(GradingConfig::default()).unwrap_or_else(|_| json!({}))
        }
    }
}

fn merge_weights(current: &mut Value, patch: &Value) -> Result<(), String> {
    let Some(patch_obj) = patch.as_object() else {
        return Err("weights must be an object".to_string());
    };
    if !current.is_object() {
        *current = json!({});
    }
    let Some(obj) = current.as_object_mut() else {
        return Err("weights must be an object".to_string());
    };
    for (k, v) in patch_obj {
        match k.as_str() {
            "attendance" | "jury" | "report" => {
                if !v.is_number() {
                    return Err(format!("weights.{} must be a number", k));
                }
                obj.insert(k.clone(), v.clone());
            }
            _ => return Err(format!("unknown weight: {}", k)),
        }
    }
    Ok(())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let Some(obj) = current.as_object_mut() else {
        return Err("section value must be an object".to_string());
    };
    match section {
        SetupSection::Grading => {
            for (k, v) in patch {
                match k.as_str() {
                    "weights" => {
                        let slot = obj.entry(k.clone()).or_insert_with(|| json!({}));
                        merge_weights(slot, v)?;
                    }
                    "passingGrade" | "outstandingGrade" => {
                        if !v.is_number() {
                            return Err(format!("{} must be a number", k));
                        }
                        obj.insert(k.clone(), v.clone());
                    }
                    "generalScoreMode" => match v.as_str() {
                        Some("cumulative") | Some("session") => {
                            obj.insert(k.clone(), v.clone());
                        }
                        _ => {
                            return Err(
                                "generalScoreMode must be \"cumulative\" or \"session\"".to_string()
                            )
                        }
                    },
                    _ => return Err(format!("unknown grading field: {}", k)),
                }
            }
        }
    }
    Ok(())
}

/// Current value of a section, defaults filled in. Unusable stored values are an error here,
/// the same way they are for every grading call.
fn load_section(conn: &Connection, section: SetupSection) -> Result<Value, HandlerErr> {
    match section {
        SetupSection::Grading => {
            let cfg = load_grading_config(conn)?;
            serde_json::to_value(&cfg).map_err(|e| db_query_err(e.to_string()))
        }
    }
}

fn setup_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let sections: Vec<SetupSection> = match get_optional_str(params, "section")? {
        Some(raw) => vec![SetupSection::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown section: {}", raw)))?],
        None => SetupSection::ALL.to_vec(),
    };
    let mut out = Map::new();
    for section in sections {
        let value = load_section(conn, section)?;
        out.insert(section.name().to_string(), value);
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    // An update is how an unusable section gets repaired, so it starts over from defaults.
    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) if e.code == "invalid_settings" => {
            warn!(section = section.name(), error = %e.message, "replacing unusable settings");
            default_section(section)
        }
        Err(e) => return Err(e),
    };
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;

    let stored = match section {
        SetupSection::Grading => {
            let cfg: GradingConfig = serde_json::from_value(current)
                .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
            cfg.validate()?;
            serde_json::to_value(&cfg).map_err(|e| HandlerErr::bad_params(e.to_string()))?
        }
    };
    db::settings_set_json(conn, section.key(), &stored)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(section = section.name(), "settings updated");
    let mut out = Map::new();
    out.insert(section.name().to_string(), stored);
    Ok(Value::Object(out))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
