//! Aggregate dashboard statistics with a short-TTL Redis cache in front.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Integer, Nullable, Text};
use log::debug;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{manager_id_for_user, AuthUser, ROLE_MANAGER};
use crate::shared::state::AppState;

#[derive(Debug, Serialize, QueryableByName)]
struct TotalsRow {
    #[diesel(sql_type = BigInt)]
    total_tickets: i64,
    #[diesel(sql_type = Nullable<Double>)]
    avg_priority: Option<f64>,
    #[diesel(sql_type = BigInt)]
    negative_count: i64,
    #[diesel(sql_type = BigInt)]
    vip_count: i64,
}

#[derive(Debug, Serialize, QueryableByName)]
struct NameCountRow {
    #[diesel(sql_type = Nullable<Text>)]
    name: Option<String>,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Debug, Serialize, QueryableByName)]
struct ManagerLoadRow {
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    office: String,
    #[diesel(sql_type = Integer)]
    load: i32,
    #[diesel(sql_type = Nullable<Text>)]
    position: Option<String>,
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, (StatusCode, String)> {
    let manager_id = if user.role == ROLE_MANAGER {
        manager_id_for_user(&state.conn, user.user_id)
    } else {
        None
    };

    let cache_key = match manager_id {
        Some(m) => format!("stats:{}:mgr:{m}", user.company_id),
        None => format!("stats:{}", user.company_id),
    };
    if let Ok(mut cache) = state.cache.get_multiplexed_async_connection().await {
        if let Ok(Some(cached)) = cache.get::<_, Option<String>>(&cache_key).await {
            if let Ok(value) = serde_json::from_str::<Value>(&cached) {
                debug!("stats cache hit for {cache_key}");
                return Ok(Json(value));
            }
        }
    }

    let company = user.company_id;
    let mgr = manager_id
        .map(|m| format!(" AND a.manager_id = {m}"))
        .unwrap_or_default();

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let query_error =
        |e: diesel::result::Error| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}"));

    let totals: Vec<TotalsRow> = diesel::sql_query(format!(
        "SELECT \
           COUNT(DISTINCT t.id) AS total_tickets, \
           ROUND(AVG(ta.priority)::numeric, 1)::float8 AS avg_priority, \
           COUNT(DISTINCT t.id) FILTER (WHERE ta.sentiment = 'Negative') AS negative_count, \
           COUNT(DISTINCT t.id) FILTER (WHERE t.segment IN ('VIP', 'Priority')) AS vip_count \
         FROM tickets t \
         LEFT JOIN ticket_analysis ta ON ta.ticket_id = t.id \
         LEFT JOIN assignments a ON a.ticket_id = t.id \
         WHERE t.company_id = {company}{mgr}"
    ))
    .load(&mut conn)
    .map_err(query_error)?;

    let by_type: Vec<NameCountRow> = diesel::sql_query(format!(
        "SELECT ta.ticket_type AS name, COUNT(DISTINCT t.id) AS count \
         FROM ticket_analysis ta \
         JOIN tickets t ON t.id = ta.ticket_id \
         LEFT JOIN assignments a ON a.ticket_id = t.id \
         WHERE t.company_id = {company}{mgr} \
         GROUP BY ta.ticket_type ORDER BY count DESC"
    ))
    .load(&mut conn)
    .map_err(query_error)?;

    let by_sentiment: Vec<NameCountRow> = diesel::sql_query(format!(
        "SELECT ta.sentiment AS name, COUNT(DISTINCT t.id) AS count \
         FROM ticket_analysis ta \
         JOIN tickets t ON t.id = ta.ticket_id \
         LEFT JOIN assignments a ON a.ticket_id = t.id \
         WHERE t.company_id = {company}{mgr} \
         GROUP BY ta.sentiment"
    ))
    .load(&mut conn)
    .map_err(query_error)?;

    let by_office: Vec<NameCountRow> = diesel::sql_query(format!(
        "SELECT m.office AS name, COUNT(DISTINCT a.ticket_id) AS count \
         FROM assignments a \
         JOIN managers m ON m.id = a.manager_id \
         WHERE m.company_id = {company}{mgr} \
         GROUP BY m.office ORDER BY count DESC"
    ))
    .load(&mut conn)
    .map_err(query_error)?;

    let by_segment: Vec<NameCountRow> = diesel::sql_query(format!(
        "SELECT t.segment AS name, COUNT(DISTINCT t.id) AS count \
         FROM tickets t \
         LEFT JOIN assignments a ON a.ticket_id = t.id \
         WHERE t.company_id = {company}{mgr} \
         GROUP BY t.segment"
    ))
    .load(&mut conn)
    .map_err(query_error)?;

    let manager_filter = manager_id
        .map(|m| format!(" AND id = {m}"))
        .unwrap_or_default();
    let manager_loads: Vec<ManagerLoadRow> = diesel::sql_query(format!(
        "SELECT name, office, current_load AS load, position \
         FROM managers \
         WHERE company_id = {company}{manager_filter} \
         ORDER BY current_load DESC LIMIT 20"
    ))
    .load(&mut conn)
    .map_err(query_error)?;

    let payload = json!({
        "totals": totals.first(),
        "by_type": by_type,
        "by_sentiment": by_sentiment,
        "by_office": by_office,
        "by_segment": by_segment,
        "manager_loads": manager_loads,
    });

    if let Ok(mut cache) = state.cache.get_multiplexed_async_connection().await {
        let _: Result<(), _> = cache
            .set_ex(&cache_key, payload.to_string(), state.config.cache.stats_ttl_secs)
            .await;
    }

    Ok(Json(payload))
}

pub fn configure_stats_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/stats", get(overview))
}
