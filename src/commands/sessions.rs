use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::server::AppState;
use crate::session::models::SessionSummary;

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionSummary>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<SessionList>, ApiError> {
    let sessions = state.sessions.list().await?;
    Ok(Json(SessionList { sessions }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Docent document assistant API" }))
}
