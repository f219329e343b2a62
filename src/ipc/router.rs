use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// Handler families, tried in order until one claims the method.
const FAMILIES: [TryHandle; 15] = [
    handlers::core::try_handle,
    handlers::roles::try_handle,
    handlers::classes::try_handle,
    handlers::departments::try_handle,
    handlers::employees::try_handle,
    handlers::students::try_handle,
    handlers::parents::try_handle,
    handlers::assignments::try_handle,
    handlers::postal::try_handle,
    handlers::awards::try_handle,
    handlers::inventory::try_handle,
    handlers::salary::try_handle,
    handlers::attendance::try_handle,
    handlers::history::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _enter = span.enter();

    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    tracing::debug!("no handler claimed request");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
