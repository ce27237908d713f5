//! Function Routes
//!
//! - POST /functions/v1/create-notification

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::notify;
use crate::store::{NotificationOutcome, NotificationRequest};

/// POST /functions/v1/create-notification
///
/// With `userId` creates one notification and returns it; without one
/// notifies every staff member that has a login.
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotificationRequest>,
) -> ApiResult<Json<NotificationOutcome>> {
    let outcome = notify::fan_out(state.store.as_ref(), request).await?;
    Ok(Json(outcome))
}
