//! Office and load based ticket assignment.
//!
//! A ticket is routed to the company office nearest to its coordinates,
//! then to one of the two least-loaded managers of that office, alternated
//! by a per-office rotation counter so equal loads do not always favor the
//! same manager.

pub mod rotation;
pub mod store;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Nullable, Text, Timestamptz};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::geo::haversine_km;
use crate::shared::models::NewAssignment;
use crate::shared::schema::tickets;
use crate::shared::state::AppState;
use rotation::RotationCounter;
use store::{ManagerSlot, OfficeRef, StoreError, WorkloadStore};

/// How many of the least-loaded managers take part in rotation.
const POOL_SIZE: i64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no business units configured for this company")]
    NoOfficesConfigured,
    #[error("no managers available in office {0}")]
    NoManagersAvailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("rotation counter error: {0}")]
    Rotation(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentOutcome {
    pub manager_id: i32,
    pub manager_name: String,
    pub office: String,
    pub reason: String,
}

pub struct AssignmentEngine {
    store: Arc<dyn WorkloadStore>,
    rotation: Arc<dyn RotationCounter>,
    default_office: String,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn WorkloadStore>,
        rotation: Arc<dyn RotationCounter>,
        default_office: String,
    ) -> Self {
        Self {
            store,
            rotation,
            default_office,
        }
    }

    /// Route one ticket to a manager and persist the decision.
    ///
    /// Not idempotent: calling this twice for the same ticket records two
    /// assignments and bumps two loads.
    pub async fn assign(
        &self,
        ticket_id: i32,
        analysis_id: Option<i32>,
        coords: Option<(f64, f64)>,
    ) -> Result<AssignmentOutcome, RoutingError> {
        let company_id = self.store.ticket_company(ticket_id)?;
        let units = self.store.offices(company_id)?;
        if units.is_empty() {
            return Err(RoutingError::NoOfficesConfigured);
        }

        let (mut office, distance_km) = self.select_office(&units, coords);

        let mut pool = self.store.least_loaded(&office, POOL_SIZE)?;
        if pool.is_empty() {
            // Graceful degradation: the resolved office has no staff, fall
            // back to the company's first office.
            warn!("office {office} has no managers, falling back to {}", units[0].office);
            office = units[0].office.clone();
            pool = self.store.least_loaded(&office, POOL_SIZE)?;
        }
        if pool.is_empty() {
            return Err(RoutingError::NoManagersAvailable(office));
        }

        let counter = self
            .rotation
            .next(&office)
            .await
            .map_err(|e| RoutingError::Rotation(e.to_string()))?;
        let picked = (counter % pool.len() as u64) as usize;
        let chosen = &pool[picked];

        let office_id = units.iter().find(|u| u.office == office).map(|u| u.id);
        let reason = build_reason(&office, distance_km, &pool, picked, counter);

        self.store.commit(NewAssignment {
            ticket_id,
            analysis_id,
            manager_id: chosen.id,
            office_id,
            reason: reason.clone(),
        })?;

        info!(
            "ticket {ticket_id} assigned to manager {} ({}) in {office}",
            chosen.id, chosen.name
        );

        Ok(AssignmentOutcome {
            manager_id: chosen.id,
            manager_name: chosen.name.clone(),
            office,
            reason,
        })
    }

    fn select_office(
        &self,
        units: &[OfficeRef],
        coords: Option<(f64, f64)>,
    ) -> (String, Option<i64>) {
        match coords {
            Some((lat, lon)) => {
                let mut best: Option<(f64, &OfficeRef)> = None;
                for unit in units {
                    if let (Some(ulat), Some(ulon)) = (unit.latitude, unit.longitude) {
                        let dist = haversine_km(lat, lon, ulat, ulon);
                        if best.map_or(true, |(d, _)| dist < d) {
                            best = Some((dist, unit));
                        }
                    }
                }
                match best {
                    Some((dist, unit)) => (unit.office.clone(), Some(dist.round() as i64)),
                    // No office has coordinates at all.
                    None => (units[0].office.clone(), None),
                }
            }
            None => {
                let preferred = units
                    .iter()
                    .find(|u| u.office == self.default_office)
                    .unwrap_or(&units[0]);
                (preferred.office.clone(), None)
            }
        }
    }
}

/// Deterministic justification string stored with the assignment. Given the
/// same inputs and counter value it reproduces byte for byte.
fn build_reason(
    office: &str,
    distance_km: Option<i64>,
    pool: &[ManagerSlot],
    picked: usize,
    counter: u64,
) -> String {
    let distance_part = match distance_km {
        Some(km) => format!(" (~{km} km away)"),
        None => String::new(),
    };
    let pool_part = pool
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if i == picked {
                format!("{} ({} tickets) <- picked", m.name, m.current_load)
            } else {
                format!("{} ({} tickets)", m.name, m.current_load)
            }
        })
        .collect::<Vec<_>>()
        .join(" vs ");
    format!(
        "Office: {office}{distance_part}. Round-robin over top-{} least loaded: {pool_part}. Counter={counter}, index={picked}.",
        pool.len()
    )
}

#[derive(Debug, Deserialize, Default)]
pub struct AssignTicketRequest {
    pub analysis_id: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    user: crate::auth::AuthUser,
    Path(id): Path<i32>,
    body: Option<Json<AssignTicketRequest>>,
) -> Result<Json<AssignmentOutcome>, (StatusCode, String)> {
    let Json(req) = body.unwrap_or_default();

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let ticket: crate::shared::models::Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .filter(tickets::company_id.eq(user.company_id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;
    drop(conn);

    let coords = match (req.latitude, req.longitude) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => ticket.latitude.zip(ticket.longitude),
    };

    let outcome = state
        .assignment
        .assign(id, req.analysis_id, coords)
        .await
        .map_err(|e| match e {
            RoutingError::NoOfficesConfigured | RoutingError::NoManagersAvailable(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            RoutingError::Store(_) | RoutingError::Rotation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        })?;

    Ok(Json(outcome))
}

#[derive(Debug, Serialize, QueryableByName)]
pub struct AssignmentRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Integer)]
    pub ticket_id: i32,
    #[diesel(sql_type = Integer)]
    pub manager_id: i32,
    #[diesel(sql_type = Text)]
    pub manager_name: String,
    #[diesel(sql_type = Text)]
    pub office: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub reason: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    user: crate::auth::AuthUser,
) -> Result<Json<Vec<AssignmentRow>>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let rows = diesel::sql_query(
        "SELECT a.id, a.ticket_id, a.manager_id, m.name AS manager_name, m.office, \
         a.reason, a.created_at \
         FROM assignments a JOIN managers m ON m.id = a.manager_id \
         WHERE m.company_id = $1 ORDER BY a.created_at DESC LIMIT 200",
    )
    .bind::<Integer, _>(user.company_id)
    .load::<AssignmentRow>(&mut conn)
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(rows))
}

pub fn configure_routing_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets/:id/assign", post(assign_ticket))
        .route("/api/assignments", get(list_assignments))
}
