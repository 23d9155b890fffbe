use crate::db;
use crate::engine::ThresholdSet;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    bands_to_json, load_threshold_set, param_str, parse_bands_param, require_db, require_section,
    HandlerErr, DEFAULT_THRESHOLDS_KEY,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_thresholds_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let (set, source) = load_threshold_set(conn, &section_id)?;
        Ok(json!({
            "sectionId": section_id,
            "thresholds": bands_to_json(&set),
            "source": source,
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

/// Persist a section's grade-cut configuration. The ordering invariant is
/// enforced up front; on violation the offending adjacent pair is reported
/// and nothing is written.
fn handle_thresholds_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let bands = parse_bands_param(&req.params)?;
        let set = ThresholdSet::new(bands)?;

        let tx = conn.unchecked_transaction().map_err(HandlerErr::db_query)?;
        tx.execute(
            "DELETE FROM grade_thresholds WHERE section_id = ?",
            [&section_id],
        )
        .map_err(HandlerErr::db_query)?;
        for (i, band) in set.bands().iter().enumerate() {
            tx.execute(
                "INSERT INTO grade_thresholds(section_id, label, boundary, sort_order)
                 VALUES(?, ?, ?, ?)",
                (&section_id, &band.label, band.boundary, i as i64),
            )
            .map_err(HandlerErr::db_query)?;
        }
        tx.commit().map_err(HandlerErr::db_query)?;

        Ok(json!({ "sectionId": section_id, "saved": set.bands().len() }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

/// Store the workspace-wide default set used by sections without their own.
fn handle_thresholds_set_default(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let bands = parse_bands_param(&req.params)?;
        let set = ThresholdSet::new(bands)?;

        db::settings_set_json(conn, DEFAULT_THRESHOLDS_KEY, &bands_to_json(&set))
            .map_err(HandlerErr::db_query)?;
        Ok(json!({ "saved": set.bands().len() }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "thresholds.get" => Some(handle_thresholds_get(state, req)),
        "thresholds.save" => Some(handle_thresholds_save(state, req)),
        "thresholds.setDefault" => Some(handle_thresholds_set_default(state, req)),
        _ => None,
    }
}
