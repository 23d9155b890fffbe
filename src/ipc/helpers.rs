use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::db;
use crate::engine::{EngineError, GradeBand, ThresholdSet};
use crate::ipc::error::err;
use crate::ipc::types::AppState;

pub const DEFAULT_THRESHOLDS_KEY: &str = "thresholds.default";

pub struct HandlerErr {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn db_query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, &self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn param_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn param_finite_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing/invalid {}", key)))?;
    if !v.is_finite() {
        return Err(HandlerErr::new(
            "bad_params",
            format!("{} must be a finite number", key),
        ));
    }
    Ok(v)
}

pub fn require_section(conn: &Connection, section_id: &str) -> Result<(), HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM sections WHERE id = ?", [section_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "section not found"));
    }
    Ok(())
}

/// Parse a `thresholds: [{label, boundary}]` param into ordered bands.
/// Ordering validation happens in `ThresholdSet::new`, not here.
pub fn parse_bands_param(params: &serde_json::Value) -> Result<Vec<GradeBand>, HandlerErr> {
    let raw = params
        .get("thresholds")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing thresholds array"))?;
    let mut bands = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let label = entry
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HandlerErr::new("bad_params", format!("thresholds[{}].label missing", i))
            })?;
        let boundary = entry.get("boundary").and_then(|v| v.as_f64()).ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                format!("thresholds[{}].boundary must be a number", i),
            )
        })?;
        if !boundary.is_finite() {
            return Err(HandlerErr::new(
                "bad_params",
                format!("thresholds[{}].boundary must be finite", i),
            ));
        }
        bands.push(GradeBand { label, boundary });
    }
    Ok(bands)
}

/// Resolve the threshold set for a section: stored rows first, then the
/// workspace default, then the built-in bands. The returned set has already
/// passed ordering validation.
pub fn load_threshold_set(
    conn: &Connection,
    section_id: &str,
) -> Result<(ThresholdSet, &'static str), HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT label, boundary FROM grade_thresholds
             WHERE section_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::db_query)?;
    let bands: Vec<GradeBand> = stmt
        .query_map([section_id], |r| {
            Ok(GradeBand {
                label: r.get(0)?,
                boundary: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    if !bands.is_empty() {
        return Ok((ThresholdSet::new(bands)?, "section"));
    }

    let default_json = db::settings_get_json(conn, DEFAULT_THRESHOLDS_KEY)
        .map_err(HandlerErr::db_query)?;
    if let Some(value) = default_json {
        let bands: Vec<GradeBand> = serde_json::from_value(value).map_err(|e| {
            HandlerErr::new(
                "bad_params",
                format!("stored default thresholds are malformed: {}", e),
            )
        })?;
        return Ok((ThresholdSet::new(bands)?, "workspaceDefault"));
    }

    Ok((ThresholdSet::default_set(), "builtin"))
}

pub fn bands_to_json(set: &ThresholdSet) -> serde_json::Value {
    json!(set
        .bands()
        .iter()
        .map(|b| json!({ "label": b.label, "boundary": b.boundary }))
        .collect::<Vec<_>>())
}
