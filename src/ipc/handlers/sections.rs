use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let name = match param_str(&req.params, "name") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        Ok(_) => return err(&req.id, "bad_params", "name must not be empty", None),
        Err(e) => return e.response(&req.id),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute("INSERT INTO sections(id, name) VALUES(?, ?)", (&id, &name)) {
        return HandlerErr::db_query(e).response(&req.id);
    }

    ok(&req.id, json!({ "sectionId": id, "name": name }))
}

fn handle_sections_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let rows: Result<Vec<serde_json::Value>, rusqlite::Error> = conn
        .prepare("SELECT id, name FROM sections ORDER BY name")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                }))
            })
            .and_then(|it| it.collect())
        });
    match rows {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => HandlerErr::db_query(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.list" => Some(handle_sections_list(state, req)),
        _ => None,
    }
}
