use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const CHAIN: &[Handler] = &[
    handlers::core::try_handle,
    handlers::sections::try_handle,
    handlers::students::try_handle,
    handlers::items::try_handle,
    handlers::scores::try_handle,
    handlers::thresholds::try_handle,
    handlers::grades::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(method = %req.method, id = %req.id, "dispatch");

    for try_handle in CHAIN {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
