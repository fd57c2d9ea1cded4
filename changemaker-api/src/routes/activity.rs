/// `GET /api/workspaces/:slug/activity?limit=` - admins; newest first

use super::{admin_workspace, LimitQuery};
use crate::{app::AppState, error::ApiResult};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use changemaker_shared::{auth::middleware::AuthContext, models::activity_event::ActivityEvent};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ListActivityResponse {
    pub events: Vec<ActivityEvent>,
}

pub async fn list_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<ListActivityResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let events = ActivityEvent::list_by_workspace(&state.db, workspace.id, query.clamped()).await?;
    Ok(Json(ListActivityResponse { events }))
}
