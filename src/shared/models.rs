use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::schema::{assignments, business_units, managers, ticket_analysis, tickets, users};

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub company_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: i32,
    pub company_id: i32,
    pub subject: String,
    pub description: Option<String>,
    pub segment: Option<String>,
    pub channel: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub company_id: i32,
    pub subject: String,
    pub description: Option<String>,
    pub segment: Option<String>,
    pub channel: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = ticket_analysis)]
pub struct TicketAnalysis {
    pub id: i32,
    pub ticket_id: i32,
    pub company_id: i32,
    pub ticket_type: Option<String>,
    pub priority: Option<i32>,
    pub sentiment: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = managers)]
pub struct Manager {
    pub id: i32,
    pub company_id: i32,
    pub user_id: Option<i32>,
    pub name: String,
    pub position: Option<String>,
    pub office: String,
    pub current_load: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = managers)]
pub struct NewManager {
    pub company_id: i32,
    pub user_id: Option<i32>,
    pub name: String,
    pub position: Option<String>,
    pub office: String,
    pub current_load: i32,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = business_units)]
pub struct BusinessUnit {
    pub id: i32,
    pub company_id: i32,
    pub office: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = business_units)]
pub struct NewBusinessUnit {
    pub company_id: i32,
    pub office: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = business_units)]
pub struct BusinessUnitChanges {
    pub office: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = assignments)]
pub struct Assignment {
    pub id: i32,
    pub ticket_id: i32,
    pub analysis_id: Option<i32>,
    pub manager_id: i32,
    pub office_id: Option<i32>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = assignments)]
pub struct NewAssignment {
    pub ticket_id: i32,
    pub analysis_id: Option<i32>,
    pub manager_id: i32,
    pub office_id: Option<i32>,
    pub reason: String,
}
