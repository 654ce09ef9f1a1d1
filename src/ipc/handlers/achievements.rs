use crate::achievements::{compute_achievements, normalize_thresholds, AchievementEngine};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{default_achievement_table, AchievementTable, PointEvent};
use rusqlite::Connection;
use serde_json::json;

const TABLE_KEY: &str = "achievements.table";
const MAX_NAME_LEN: usize = 80;

fn load_table(conn: &Connection) -> anyhow::Result<Option<AchievementTable>> {
    match db::settings_get_json(conn, TABLE_KEY)? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

fn validate_table(table: &AchievementTable) -> Result<(), String> {
    if table.contains_key(&0) {
        return Err("thresholds must be positive integers".into());
    }
    for (threshold, def) in table {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(format!("achievement {} must have a name", threshold));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(format!(
                "achievement {} name length must be <= {}",
                threshold, MAX_NAME_LEN
            ));
        }
    }
    Ok(())
}

/// Request table, else persisted table, else the built-in one. Thresholds
/// default to the table's keys when the request names none.
fn resolve_config(
    state: &AppState,
    req: &Request,
) -> Result<(Option<Vec<u32>>, AchievementTable), serde_json::Value> {
    let table: Option<AchievementTable> = req.optional("table")?;
    let thresholds: Option<Vec<u32>> = req.optional("thresholds")?;

    let table = match table {
        Some(t) => {
            validate_table(&t).map_err(|msg| err(&req.id, "bad_params", msg, None))?;
            t
        }
        None => match state.db.as_ref() {
            Some(conn) => load_table(conn)
                .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?
                .unwrap_or_else(default_achievement_table),
            None => default_achievement_table(),
        },
    };

    Ok((thresholds, table))
}

fn handle_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let events: Vec<PointEvent> = match req.required("events") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (thresholds, table) = match resolve_config(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let thresholds = thresholds.unwrap_or_else(|| table.keys().copied().collect());
    let groups = compute_achievements(&events, &thresholds, &table);
    ok(
        &req.id,
        json!({
            "thresholds": normalize_thresholds(thresholds),
            "groups": groups,
        }),
    )
}

fn handle_compute_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let events: Vec<PointEvent> = match req.required("events") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let engine = match resolve_config(state, req) {
        Ok((Some(thresholds), table)) => AchievementEngine::new(thresholds, table),
        Ok((None, table)) => AchievementEngine::from_table(table),
        Err(resp) => return resp,
    };
    let students = engine.compute_for_class(&events);
    ok(
        &req.id,
        json!({
            "thresholds": engine.thresholds(),
            "students": students,
        }),
    )
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match load_table(conn) {
        Ok(Some(table)) => ok(&req.id, json!({ "table": table, "isDefault": false })),
        Ok(None) => ok(
            &req.id,
            json!({ "table": default_achievement_table(), "isDefault": true }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_config_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let table: AchievementTable = match req.required("table") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(msg) = validate_table(&table) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, TABLE_KEY, &json!(table)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(thresholds = table.len(), "achievement table updated");
    ok(&req.id, json!({ "table": table, "isDefault": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "achievements.compute" => Some(handle_compute(state, req)),
        "achievements.computeClass" => Some(handle_compute_class(state, req)),
        "achievements.config.get" => Some(handle_config_get(state, req)),
        "achievements.config.set" => Some(handle_config_set(state, req)),
        _ => None,
    }
}
