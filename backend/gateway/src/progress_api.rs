//! Learner progress routes.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::{debug, info};

use vibestudy_core::{Day, DayProgress, ProgressWrite, VibeError, WriteAck};

use crate::auth::RequireAuth;
use crate::error::ApiError;
use crate::server::GatewayState;

#[derive(Debug, Serialize)]
pub struct UpsertResponse {
    pub applied: bool,
}

/// Handler for `GET /api/progress/:day`
pub async fn get_day(
    State(state): State<GatewayState>,
    RequireAuth(user_id): RequireAuth,
    Path(day): Path<u32>,
) -> Result<Json<DayProgress>, ApiError> {
    let progress = state.progress.load_day(&user_id, Day(day)).await?;
    debug!(user_id = %user_id, day, tasks_done = progress.completed_task_count(), "Served day progress");
    Ok(Json(progress))
}

/// Handler for `PUT /api/progress/:day`
///
/// A write older than the stored value is acknowledged with
/// `applied: false`; it is not an error.
pub async fn put_field(
    State(state): State<GatewayState>,
    RequireAuth(user_id): RequireAuth,
    Path(day): Path<u32>,
    Json(write): Json<ProgressWrite>,
) -> Result<Json<UpsertResponse>, ApiError> {
    if write.user_id != user_id {
        return Err(VibeError::Forbidden(format!(
            "token belongs to '{user_id}', write is for '{}'",
            write.user_id
        ))
        .into());
    }
    if write.day != Day(day) {
        return Err(VibeError::InvalidRequest(format!(
            "path day {day} does not match write day {}",
            write.day.0
        ))
        .into());
    }

    let ack = state.progress.upsert(&write).await?;
    info!(key = %write.key(), ?ack, "Progress write received");
    Ok(Json(UpsertResponse {
        applied: ack == WriteAck::Applied,
    }))
}
