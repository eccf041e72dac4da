use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::OnlineStatus, AppState};

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<OnlineStatus>> {
    let status = state.engine.heartbeat(&user_id).await?;
    Ok(Json(status))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<OnlineStatus>> {
    let status = state.engine.get_online_status(&user_id).await?;
    Ok(Json(status))
}
