use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use tracing::debug;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: [TryHandle; 11] = [
    handlers::core::try_handle,
    handlers::users::try_handle,
    handlers::modules::try_handle,
    handlers::practices::try_handle,
    handlers::attendance::try_handle,
    handlers::jury::try_handle,
    handlers::reports::try_handle,
    handlers::scoring::try_handle,
    handlers::grades::try_handle,
    handlers::setup::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "request");
    for try_handle in HANDLERS {
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
