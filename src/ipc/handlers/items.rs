use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{param_finite_f64, param_str, require_db, require_section, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_items_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;
        let title = param_str(&req.params, "title")?;
        let title = title.trim();
        if title.is_empty() {
            return Err(HandlerErr::new("bad_params", "title must not be empty"));
        }
        // Non-positive maximums are storable; the aggregator just skips them.
        let max_score = param_finite_f64(&req.params, "maxScore")?;

        let idx: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(idx) + 1, 0) FROM assessment_items WHERE section_id = ?",
                [&section_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db_query)?;

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO assessment_items(id, section_id, idx, title, max_score, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (&id, &section_id, idx, title, max_score, db::now_rfc3339()),
        )
        .map_err(HandlerErr::db_query)?;

        Ok(json!({ "itemId": id, "idx": idx }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_items_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let item_id = param_str(&req.params, "itemId")?;

        let existing: Option<(String, f64)> = conn
            .query_row(
                "SELECT title, max_score FROM assessment_items WHERE id = ?",
                [&item_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some((old_title, old_max)) = existing else {
            return Err(HandlerErr::new("not_found", "assessment item not found"));
        };

        let title = match req.params.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            Some(_) => return Err(HandlerErr::new("bad_params", "title must not be empty")),
            None => old_title,
        };
        let max_score = match req.params.get("maxScore") {
            Some(_) => param_finite_f64(&req.params, "maxScore")?,
            None => old_max,
        };

        conn.execute(
            "UPDATE assessment_items SET title = ?, max_score = ?, updated_at = ? WHERE id = ?",
            (&title, max_score, db::now_rfc3339(), &item_id),
        )
        .map_err(HandlerErr::db_query)?;

        Ok(json!({ "itemId": item_id, "title": title, "maxScore": max_score }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_items_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let item_id = param_str(&req.params, "itemId")?;

        // Scores are owned by the item: they go with it.
        let tx = conn.unchecked_transaction().map_err(HandlerErr::db_query)?;
        let scores_deleted = tx
            .execute("DELETE FROM scores WHERE item_id = ?", [&item_id])
            .map_err(HandlerErr::db_query)?;
        let items_deleted = tx
            .execute("DELETE FROM assessment_items WHERE id = ?", [&item_id])
            .map_err(HandlerErr::db_query)?;
        tx.commit().map_err(HandlerErr::db_query)?;

        if items_deleted == 0 {
            return Err(HandlerErr::new("not_found", "assessment item not found"));
        }
        Ok(json!({ "deleted": true, "scoresDeleted": scores_deleted }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_items_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, idx, title, max_score
                 FROM assessment_items
                 WHERE section_id = ?
                 ORDER BY idx",
            )
            .map_err(HandlerErr::db_query)?;
        let mut total_max = 0.0_f64;
        let items: Vec<serde_json::Value> = stmt
            .query_map([&section_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, f64>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
            .into_iter()
            .map(|(id, idx, title, max_score)| {
                if max_score > 0.0 {
                    total_max += max_score;
                }
                json!({
                    "id": id,
                    "idx": idx,
                    "title": title,
                    "maxScore": max_score,
                })
            })
            .collect();

        Ok(json!({ "items": items, "totalMax": total_max }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "items.add" => Some(handle_items_add(state, req)),
        "items.update" => Some(handle_items_update(state, req)),
        "items.delete" => Some(handle_items_delete(state, req)),
        "items.list" => Some(handle_items_list(state, req)),
        _ => None,
    }
}
