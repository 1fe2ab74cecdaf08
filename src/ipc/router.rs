use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "dispatch");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::trainers::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::trainees::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::locations::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::templates::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::absences::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::planning::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::schedule_view::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::audit::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::messages::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::jobs::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
