use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::shared::models::{Manager, NewManager};
use crate::shared::schema::managers;
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateManagerRequest {
    pub name: String,
    pub position: Option<String>,
    pub office: String,
    pub user_id: Option<i32>,
}

pub async fn list_managers(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Manager>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let rows: Vec<Manager> = managers::table
        .filter(managers::company_id.eq(user.company_id))
        .order((managers::office.asc(), managers::name.asc()))
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn create_manager(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateManagerRequest>,
) -> Result<Json<Manager>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let manager: Manager = diesel::insert_into(managers::table)
        .values(NewManager {
            company_id: user.company_id,
            user_id: req.user_id,
            name: req.name,
            position: req.position,
            office: req.office,
            current_load: 0,
        })
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(manager))
}

pub async fn delete_manager(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let deleted = diesel::delete(
        managers::table
            .filter(managers::id.eq(id))
            .filter(managers::company_id.eq(user.company_id)),
    )
    .execute(&mut conn)
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if deleted == 0 {
        return Err((StatusCode::NOT_FOUND, "Manager not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_managers_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/managers", get(list_managers).post(create_manager))
        .route("/api/managers/:id", axum::routing::delete(delete_manager))
}
