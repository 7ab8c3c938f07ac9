use serde_json::json;

use super::handlers;
use super::types::{AppState, Request};
use crate::error::AppError;
use crate::fetch::Freshness;
use crate::ipc::error::{ok, respond};

type Family = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[Family] = &[
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::users::try_handle,
    handlers::departments::try_handle,
    handlers::classes::try_handle,
    handlers::attendance::try_handle,
    handlers::logs::try_handle,
    handlers::feedback::try_handle,
    handlers::registration::try_handle,
    handlers::dashboard::try_handle,
    handlers::backup_exchange::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _entered = span.enter();

    // List screens tag each fetch; an older tag than the newest seen for the
    // same method is answered without touching the database.
    if let Some(seq) = req.params.get("fetchSeq").and_then(|v| v.as_u64()) {
        if let Freshness::Stale { latest } = state.fetches.observe(&req.method, seq) {
            tracing::debug!(seq, latest, "dropping superseded fetch");
            return ok(
                &req.id,
                json!({ "stale": true, "fetchSeq": seq, "latestFetchSeq": latest }),
            );
        }
    }

    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            return resp;
        }
    }

    respond(&req.id, Err(AppError::NotImplemented(req.method.clone())))
}
