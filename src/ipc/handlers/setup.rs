use crate::calc::NA_LABEL;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::ReportOptions;
use serde_json::{json, Map, Value};

const GRADES_KEY: &str = "setup.grades";
const MAX_NA_LABEL_LEN: usize = 16;

fn default_grades() -> Value {
    json!({
        "naLabel": NA_LABEL,
        "warnOnScaleOverlap": true,
        "fallbackToFirstScale": true
    })
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_na_label(v: &Value) -> Result<String, String> {
    let label = v
        .as_str()
        .map(str::trim)
        .ok_or_else(|| "naLabel must be a string".to_string())?;
    if label.is_empty() {
        return Err("naLabel must not be empty".into());
    }
    if label.chars().count() > MAX_NA_LABEL_LEN {
        return Err(format!("naLabel length must be <= {}", MAX_NA_LABEL_LEN));
    }
    Ok(label.to_string())
}

fn parse_grades_field(key: &str, v: &Value) -> Result<Value, String> {
    match key {
        "naLabel" => parse_na_label(v).map(Value::String),
        "warnOnScaleOverlap" | "fallbackToFirstScale" => parse_bool(v, key).map(Value::Bool),
        _ => Err(format!("unknown grades field: {}", key)),
    }
}

fn merge_grades_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "grades settings must be an object".to_string())?;
    // Validate the whole patch before applying any of it.
    let mut parsed = Vec::with_capacity(patch.len());
    for (k, v) in patch {
        parsed.push((k.clone(), parse_grades_field(k, v)?));
    }
    obj.extend(parsed);
    Ok(())
}

fn load_grades(conn: &rusqlite::Connection) -> anyhow::Result<Value> {
    let mut current = default_grades();
    if let Some(saved) = db::settings_get_json(conn, GRADES_KEY)? {
        if let (Some(saved_obj), Some(obj)) = (saved.as_object(), current.as_object_mut()) {
            // Malformed saved fields keep their defaults; valid ones still apply.
            for (k, v) in saved_obj {
                match parse_grades_field(k, v) {
                    Ok(parsed) => {
                        obj.insert(k.clone(), parsed);
                    }
                    Err(msg) => tracing::warn!(field = %k, error = %msg, "ignoring saved grades field"),
                }
            }
        }
    }
    Ok(current)
}

/// Options for `grades.report`: persisted when a workspace is open, defaults otherwise.
pub(crate) fn report_options(state: &AppState) -> anyhow::Result<ReportOptions> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(ReportOptions::default());
    };
    let grades = load_grades(conn)?;
    let flag = |key: &str, default: bool| grades.get(key).and_then(|v| v.as_bool()).unwrap_or(default);
    let defaults = ReportOptions::default();
    let na_label = grades
        .get("naLabel")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| defaults.na_label.clone());
    Ok(ReportOptions {
        na_label,
        warn_on_scale_overlap: flag("warnOnScaleOverlap", defaults.warn_on_scale_overlap),
        fallback_to_first_scale: flag("fallbackToFirstScale", defaults.fallback_to_first_scale),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match load_grades(conn) {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != "grades" {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section })),
        );
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_grades(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_grades_patch(&mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, GRADES_KEY, &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "grades": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
