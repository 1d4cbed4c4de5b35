//! Public instance description for front-end identification.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::config::Backend;
use crate::AppState;

/// Structured status.
#[derive(Debug, Serialize)]
pub struct Status {
    name: String,
    url: String,
    version: String,
    backend: Backend,
    clients: usize,
}

/// `GET /status.json`.
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        name: state.config.name.clone(),
        url: state.config.url.clone(),
        version: state.config.version().to_owned(),
        backend: state.config.backend,
        clients: state.clients.len(),
    })
}
