use crate::calc::{self, ScoreIndex};
use crate::db;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use crate::model::{Assignment, GradeScale, ScoreRecord};
use crate::report::{self, ReportInput};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};

const SCALE_SELECTIONS_KEY: &str = "grades.scaleSelections";

fn load_scale_selections(conn: &Connection) -> anyhow::Result<BTreeMap<String, String>> {
    match db::settings_get_json(conn, SCALE_SELECTIONS_KEY)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(BTreeMap::new()),
    }
}

fn handle_aggregate(req: &Request) -> serde_json::Value {
    let assignment: Assignment = match req.required("assignment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id: String = match req.required("studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scores: Vec<ScoreRecord> = match req.optional("scores") {
        Ok(v) => v.unwrap_or_default(),
        Err(resp) => return resp,
    };
    let section_ids: Option<Vec<String>> = match req.optional("sectionIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let index = ScoreIndex::new(&scores);
    let only: Option<HashSet<&str>> = section_ids
        .as_ref()
        .map(|ids| ids.iter().map(String::as_str).collect());
    let agg = calc::aggregate_filtered(&assignment, &student_id, &index, only.as_ref());
    let percent = calc::percentage(agg.earned, agg.possible);
    ok(
        &req.id,
        json!({
            "earned": agg.earned,
            "possible": agg.possible,
            "missingItems": agg.missing_items,
            "percent": percent,
        }),
    )
}

fn handle_resolve(req: &Request) -> serde_json::Value {
    let earned: f64 = match req.required("earned") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let possible: f64 = match req.required("possible") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let scale: Option<GradeScale> = match req.optional("scale") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let resolution = calc::resolve(earned, possible, scale.as_ref());
    ok(&req.id, json!(resolution))
}

fn handle_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut input: ReportInput = match req.decode_params() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let opts = match setup::report_options(state) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(conn) = state.db.as_ref() {
        let saved = match load_scale_selections(conn) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        // Request selections win over persisted ones.
        for (subject_id, scale_id) in saved {
            input.scale_selections.entry(subject_id).or_insert(scale_id);
        }
    }

    match report::build_report(&input, &opts) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => {
            tracing::warn!(code = %e.code, error = %e.message, "grade report rejected");
            calc_err(&req.id, e)
        }
    }
}

fn handle_scales_validate(req: &Request) -> serde_json::Value {
    let scales: Vec<GradeScale> = match req.required("scales") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let warnings: Vec<calc::ScaleWarning> = scales.iter().flat_map(calc::validate_scale).collect();
    ok(&req.id, json!({ "warnings": warnings }))
}

fn handle_selections_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match load_scale_selections(conn) {
        Ok(selections) => ok(&req.id, json!({ "selections": selections })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_selections_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match state.require_db(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let patch: BTreeMap<String, Option<String>> = match req.required("selections") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mut selections = match load_scale_selections(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for (subject_id, scale_id) in patch {
        match scale_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(scale_id) => {
                selections.insert(subject_id, scale_id);
            }
            None => {
                selections.remove(&subject_id);
            }
        }
    }
    if let Err(e) = db::settings_set_json(conn, SCALE_SELECTIONS_KEY, &json!(selections)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "selections": selections }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.aggregate" => Some(handle_aggregate(req)),
        "grades.resolve" => Some(handle_resolve(req)),
        "grades.report" => Some(handle_report(state, req)),
        "grades.scales.validate" => Some(handle_scales_validate(req)),
        "grades.scaleSelections.get" => Some(handle_selections_get(state, req)),
        "grades.scaleSelections.set" => Some(handle_selections_set(state, req)),
        _ => None,
    }
}
