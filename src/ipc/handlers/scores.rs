use crate::db;
use crate::engine::{self, EntryStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const SCORES_SAVE_MAX_ENTRIES: usize = 5000;

struct ItemRow {
    section_id: String,
    max_score: f64,
}

fn load_item(conn: &Connection, item_id: &str) -> Result<ItemRow, HandlerErr> {
    conn.query_row(
        "SELECT section_id, max_score FROM assessment_items WHERE id = ?",
        [item_id],
        |r| {
            Ok(ItemRow {
                section_id: r.get(0)?,
                max_score: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::new("not_found", "assessment item not found"))
}

/// Resolve `sectionId` + `itemId` and reject an item that belongs to a
/// different section than the one named in the request.
fn load_item_in_section(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, ItemRow), HandlerErr> {
    let section_id = param_str(params, "sectionId")?;
    let item_id = param_str(params, "itemId")?;
    let item = load_item(conn, &item_id)?;
    if item.section_id != section_id {
        return Err(HandlerErr::new(
            "not_found",
            "assessment item is not in this section",
        ));
    }
    Ok((item_id, item))
}

fn section_student_ids(conn: &Connection, section_id: &str) -> Result<HashSet<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE section_id = ?")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([section_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(HandlerErr::db_query)
}

fn saved_scores_for_item(
    conn: &Connection,
    item_id: &str,
) -> Result<HashMap<String, f64>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT student_id, raw_value FROM scores WHERE item_id = ?")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([item_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(HandlerErr::db_query)
}

struct CheckedEntry {
    student_id: String,
    status: EntryStatus,
}

/// Shared front half of validate and save: resolve the item, bounds-check
/// every cell, and reject unknown students. Returns per-cell diagnostics for
/// the invalid cells alongside the checked entries.
fn check_entries(
    conn: &Connection,
    req: &Request,
) -> Result<(String, ItemRow, Vec<CheckedEntry>, Vec<serde_json::Value>), HandlerErr> {
    let (item_id, item) = load_item_in_section(conn, &req.params)?;
    let known_students = section_student_ids(conn, &item.section_id)?;

    let raw_entries = req
        .params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing entries array"))?;
    if raw_entries.len() > SCORES_SAVE_MAX_ENTRIES {
        return Err(HandlerErr::new(
            "bad_params",
            format!("too many entries (max {})", SCORES_SAVE_MAX_ENTRIES),
        ));
    }

    let null = serde_json::Value::Null;
    let mut checked = Vec::with_capacity(raw_entries.len());
    let mut invalid = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (i, entry) in raw_entries.iter().enumerate() {
        let student_id = entry
            .get("studentId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                HandlerErr::new("bad_params", format!("entries[{}].studentId missing", i))
            })?;
        if !known_students.contains(&student_id) {
            return Err(HandlerErr::new(
                "not_found",
                format!("student {} is not in this section", student_id),
            ));
        }
        if !seen.insert(student_id.clone()) {
            return Err(HandlerErr::new(
                "bad_params",
                format!("duplicate entry for student {}", student_id),
            ));
        }

        let raw = entry.get("value").unwrap_or(&null);
        let status = engine::validate_entry_json(raw, item.max_score);
        if status == EntryStatus::Invalid {
            invalid.push(json!({
                "studentId": student_id,
                "value": raw,
                "maxScore": item.max_score,
            }));
        }
        checked.push(CheckedEntry { student_id, status });
    }

    Ok((item_id, item, checked, invalid))
}

fn handle_scores_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let (item_id, item) = load_item_in_section(conn, &req.params)?;
        let saved = saved_scores_for_item(conn, &item_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT id FROM students WHERE section_id = ? ORDER BY sort_order",
            )
            .map_err(HandlerErr::db_query)?;
        let student_ids: Vec<String> = stmt
            .query_map([&item.section_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;

        let rows: Vec<serde_json::Value> = student_ids
            .into_iter()
            .map(|sid| {
                let raw = saved.get(&sid).copied();
                json!({
                    "studentId": sid,
                    "rawValue": raw,
                    "status": engine::validate_entry(raw, item.max_score).as_str(),
                })
            })
            .collect();

        Ok(json!({ "itemId": item_id, "maxScore": item.max_score, "scores": rows }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

/// Dry-run validation for the entry grid: per-cell status plus the
/// changed-vs-last-saved flag. Persists nothing.
fn handle_scores_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let (item_id, item, checked, _invalid) = check_entries(conn, req)?;
        let saved = saved_scores_for_item(conn, &item_id)?;

        let mut invalid_count = 0_usize;
        let mut changed_count = 0_usize;
        let rows: Vec<serde_json::Value> = checked
            .iter()
            .map(|e| {
                let last_saved = saved.get(&e.student_id).copied();
                let changed = engine::entry_changed(e.status.value(), last_saved);
                if e.status == EntryStatus::Invalid {
                    invalid_count += 1;
                }
                if changed {
                    changed_count += 1;
                }
                json!({
                    "studentId": e.student_id,
                    "status": e.status.as_str(),
                    "value": e.status.value(),
                    "changed": changed,
                })
            })
            .collect();

        Ok(json!({
            "itemId": item_id,
            "maxScore": item.max_score,
            "entries": rows,
            "invalidCount": invalid_count,
            "changedCount": changed_count,
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

/// Save one item's batch of cells. All-or-nothing: a single invalid cell
/// rejects the whole batch so the teacher fixes every error before anything
/// persists. Unfilled cells clear the stored row.
fn handle_scores_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let (item_id, _item, checked, invalid) = match check_entries(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if !invalid.is_empty() {
        return err(
            &req.id,
            "invalid_score_entry",
            format!("{} entries are out of bounds; nothing was saved", invalid.len()),
            Some(json!({ "errors": invalid })),
        );
    }

    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let tx = conn.unchecked_transaction().map_err(HandlerErr::db_query)?;
        let now = db::now_rfc3339();
        let mut saved = 0_usize;
        let mut cleared = 0_usize;
        for entry in &checked {
            match entry.status {
                EntryStatus::Valid(v) => {
                    tx.execute(
                        "INSERT INTO scores(id, item_id, student_id, raw_value, updated_at)
                         VALUES(?, ?, ?, ?, ?)
                         ON CONFLICT(item_id, student_id)
                         DO UPDATE SET raw_value = excluded.raw_value, updated_at = excluded.updated_at",
                        (
                            Uuid::new_v4().to_string(),
                            &item_id,
                            &entry.student_id,
                            v,
                            &now,
                        ),
                    )
                    .map_err(HandlerErr::db_query)?;
                    saved += 1;
                }
                EntryStatus::Unfilled => {
                    cleared += tx
                        .execute(
                            "DELETE FROM scores WHERE item_id = ? AND student_id = ?",
                            (&item_id, &entry.student_id),
                        )
                        .map_err(HandlerErr::db_query)?;
                }
                // Invalid batches were rejected above.
                EntryStatus::Invalid => continue,
            }
        }
        tx.commit().map_err(HandlerErr::db_query)?;

        tracing::debug!(item = %item_id, saved, cleared, "scores saved");
        Ok(json!({ "saved": saved, "cleared": cleared }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.get" => Some(handle_scores_get(state, req)),
        "scores.validate" => Some(handle_scores_validate(state, req)),
        "scores.save" => Some(handle_scores_save(state, req)),
        _ => None,
    }
}
