use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use diesel::prelude::*;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::geo::AddressSuggestion;
use crate::shared::models::{BusinessUnit, BusinessUnitChanges, NewBusinessUnit};
use crate::shared::schema::business_units;
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    pub q: String,
    pub city: Option<String>,
}

pub async fn suggestions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestQuery>,
) -> Json<Vec<AddressSuggestion>> {
    if query.q.len() < 2 {
        return Json(Vec::new());
    }
    Json(state.geo.suggest(&query.q, query.city.as_deref()).await)
}

#[derive(Debug, Deserialize)]
pub struct ReverseQuery {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize)]
pub struct ReverseResponse {
    pub address: Option<String>,
}

pub async fn reverse_geocode(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReverseQuery>,
) -> Json<ReverseResponse> {
    Json(ReverseResponse {
        address: state.geo.reverse_geocode(query.lat, query.lon).await,
    })
}

pub async fn list_units(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<BusinessUnit>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let rows: Vec<BusinessUnit> = business_units::table
        .filter(business_units::company_id.eq(user.company_id))
        .order(business_units::id.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_unit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<BusinessUnit>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let unit: BusinessUnit = business_units::table
        .filter(business_units::id.eq(id))
        .filter(business_units::company_id.eq(user.company_id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Business unit not found".to_string()))?;

    Ok(Json(unit))
}

#[derive(Debug, Deserialize)]
pub struct CreateUnitRequest {
    pub office: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn create_unit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateUnitRequest>,
) -> Result<Json<BusinessUnit>, (StatusCode, String)> {
    // Auto-geocode when the caller supplied an address but no coordinates.
    let mut latitude = req.latitude;
    let mut longitude = req.longitude;
    if latitude.is_none() || longitude.is_none() {
        if let Some(address) = req.address.as_deref() {
            let full = format!("{} {address}", req.office);
            if let Some((lat, lon)) = state.geo.geocode(&full).await {
                debug!("geocoded {full:?} to ({lat}, {lon})");
                latitude = Some(lat);
                longitude = Some(lon);
            }
        }
    }

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let unit: BusinessUnit = diesel::insert_into(business_units::table)
        .values(NewBusinessUnit {
            company_id: user.company_id,
            office: req.office,
            address: req.address,
            latitude,
            longitude,
        })
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(unit))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUnitRequest {
    pub office: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn update_unit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(req): Json<UpdateUnitRequest>,
) -> Result<Json<BusinessUnit>, (StatusCode, String)> {
    // Re-geocode when the address changes without explicit coordinates.
    let mut latitude = req.latitude;
    let mut longitude = req.longitude;
    if latitude.is_none() && longitude.is_none() {
        if let Some(address) = req.address.as_deref() {
            if let Some((lat, lon)) = state.geo.geocode(address).await {
                latitude = Some(lat);
                longitude = Some(lon);
            }
        }
    }
    if req.office.is_none() && req.address.is_none() && latitude.is_none() && longitude.is_none() {
        return get_unit(State(state), user, Path(id)).await;
    }

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let unit: BusinessUnit = diesel::update(
        business_units::table
            .filter(business_units::id.eq(id))
            .filter(business_units::company_id.eq(user.company_id)),
    )
    .set(BusinessUnitChanges {
        office: req.office,
        address: req.address,
        latitude,
        longitude,
    })
    .get_result(&mut conn)
    .map_err(|_| (StatusCode::NOT_FOUND, "Business unit not found".to_string()))?;

    Ok(Json(unit))
}

pub async fn delete_unit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let deleted = diesel::delete(
        business_units::table
            .filter(business_units::id.eq(id))
            .filter(business_units::company_id.eq(user.company_id)),
    )
    .execute(&mut conn)
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if deleted == 0 {
        return Err((StatusCode::NOT_FOUND, "Business unit not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_business_units_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/business-units/suggestions", get(suggestions))
        .route("/api/business-units/reverse-geocode", get(reverse_geocode))
        .route("/api/business-units", get(list_units).post(create_unit))
        .route(
            "/api/business-units/:id",
            get(get_unit).put(update_unit).delete(delete_unit),
        )
}
