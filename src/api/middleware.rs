//! API key gate
//!
//! Every route outside `/health` requires the anonymous key, either as
//! the `apikey` header or, for browser WebSockets that cannot set
//! headers, as the `apikey` query parameter.

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiError;
use super::state::AppState;

fn presented_key(req: &Request) -> Option<String> {
    if let Some(value) = req.headers().get("apikey").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove("apikey"))
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    match presented_key(&req) {
        Some(key) if key == state.anon_key() => next.run(req).await,
        Some(_) => ApiError::Unauthorized("invalid API key".to_string()).into_response(),
        None => ApiError::Unauthorized("missing apikey header".to_string()).into_response(),
    }
}
