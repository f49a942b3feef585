use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::shared::models::{NewTicket, Ticket};
use crate::shared::schema::tickets;
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub segment: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub description: Option<String>,
    pub segment: Option<String>,
    pub channel: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let mut q = tickets::table
        .filter(tickets::company_id.eq(user.company_id))
        .into_boxed();

    if let Some(segment) = query.segment {
        q = q.filter(tickets::segment.eq(segment));
    }
    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            tickets::subject
                .ilike(pattern.clone())
                .or(tickets::description.ilike(pattern)),
        );
    }

    let rows: Vec<Ticket> = q
        .order(tickets::created_at.desc())
        .limit(query.limit.unwrap_or(50))
        .offset(query.offset.unwrap_or(0))
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<Ticket>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .filter(tickets::company_id.eq(user.company_id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    Ok(Json(ticket))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<Ticket>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let ticket: Ticket = diesel::insert_into(tickets::table)
        .values(NewTicket {
            company_id: user.company_id,
            subject: req.subject,
            description: req.description,
            segment: req.segment,
            channel: req.channel,
            address: req.address,
            latitude: req.latitude,
            longitude: req.longitude,
        })
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(ticket))
}

#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct CsvTicket {
    subject: String,
    description: Option<String>,
    segment: Option<String>,
    channel: Option<String>,
    address: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Bulk-load tickets from a CSV body. Rows that fail to parse are counted
/// and skipped rather than aborting the whole import.
pub async fn import_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: String,
) -> Result<Json<ImportSummary>, (StatusCode, String)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<CsvTicket>() {
        match record {
            Ok(row) => rows.push(NewTicket {
                company_id: user.company_id,
                subject: row.subject,
                description: row.description,
                segment: row.segment,
                channel: row.channel,
                address: row.address,
                latitude: row.latitude,
                longitude: row.longitude,
            }),
            Err(_) => skipped += 1,
        }
    }

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let imported = diesel::insert_into(tickets::table)
        .values(&rows)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    info!(
        "imported {imported} tickets for company {} ({skipped} rows skipped)",
        user.company_id
    );
    Ok(Json(ImportSummary { imported, skipped }))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/import", post(import_tickets))
        .route("/api/tickets/:id", get(get_ticket))
}
