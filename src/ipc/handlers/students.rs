use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{param_str, require_db, require_section, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let raw = req
            .params
            .get("students")
            .and_then(|v| v.as_array())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing students array"))?;
        if raw.is_empty() {
            return Err(HandlerErr::new("bad_params", "students array is empty"));
        }

        let base_order: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM students WHERE section_id = ?",
                [&section_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db_query)?;

        let tx = conn.unchecked_transaction().map_err(HandlerErr::db_query)?;
        let now = db::now_rfc3339();
        let mut added = Vec::with_capacity(raw.len());
        for (i, entry) in raw.iter().enumerate() {
            let first_name = entry
                .get("firstName")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    HandlerErr::new("bad_params", format!("students[{}].firstName missing", i))
                })?;
            let last_name = entry
                .get("lastName")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    HandlerErr::new("bad_params", format!("students[{}].lastName missing", i))
                })?;
            let student_no = entry.get("studentNo").and_then(|v| v.as_str()).map(str::trim);

            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO students(id, section_id, student_no, first_name, last_name, sort_order, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &section_id,
                    student_no,
                    first_name,
                    last_name,
                    base_order + i as i64,
                    &now,
                ),
            )
            .map_err(HandlerErr::db_query)?;
            added.push(json!({ "studentId": id }));
        }
        tx.commit().map_err(HandlerErr::db_query)?;

        Ok(json!({ "added": added.len(), "students": added }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, student_no, first_name, last_name, sort_order
                 FROM students
                 WHERE section_id = ?
                 ORDER BY sort_order",
            )
            .map_err(HandlerErr::db_query)?;
        let students: Vec<serde_json::Value> = stmt
            .query_map([&section_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentNo": r.get::<_, Option<String>>(1)?,
                    "firstName": r.get::<_, String>(2)?,
                    "lastName": r.get::<_, String>(3)?,
                    "sortOrder": r.get::<_, i64>(4)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;

        Ok(json!({ "students": students }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
