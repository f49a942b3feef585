use diesel::prelude::*;

use crate::shared::models::NewAssignment;
use crate::shared::schema::{assignments, business_units, managers, tickets};
use crate::shared::utils::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug, Clone)]
pub struct OfficeRef {
    pub id: i32,
    pub office: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ManagerSlot {
    pub id: i32,
    pub name: String,
    pub current_load: i32,
}

/// Persistence seam for the assignment engine. The engine only reads
/// workloads through this trait and commits through `commit`, which must
/// be atomic: either the assignment row and the load increment both land
/// or neither does.
pub trait WorkloadStore: Send + Sync {
    fn ticket_company(&self, ticket_id: i32) -> Result<Option<i32>, StoreError>;
    fn offices(&self, company_id: Option<i32>) -> Result<Vec<OfficeRef>, StoreError>;
    fn least_loaded(&self, office: &str, limit: i64) -> Result<Vec<ManagerSlot>, StoreError>;
    fn commit(&self, record: NewAssignment) -> Result<(), StoreError>;
}

pub struct PgWorkloadStore {
    pool: DbPool,
}

impl PgWorkloadStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<crate::shared::utils::DbConn, StoreError> {
        self.pool.get().map_err(|e| StoreError::Pool(e.to_string()))
    }
}

impl WorkloadStore for PgWorkloadStore {
    fn ticket_company(&self, ticket_id: i32) -> Result<Option<i32>, StoreError> {
        let mut conn = self.conn()?;
        Ok(tickets::table
            .filter(tickets::id.eq(ticket_id))
            .select(tickets::company_id)
            .first::<i32>(&mut conn)
            .optional()?)
    }

    fn offices(&self, company_id: Option<i32>) -> Result<Vec<OfficeRef>, StoreError> {
        let mut conn = self.conn()?;
        let mut query = business_units::table
            .select((
                business_units::id,
                business_units::office,
                business_units::latitude,
                business_units::longitude,
            ))
            .order(business_units::id.asc())
            .into_boxed();
        if let Some(company_id) = company_id {
            query = query.filter(business_units::company_id.eq(company_id));
        }
        let rows = query.load::<(i32, String, Option<f64>, Option<f64>)>(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(id, office, latitude, longitude)| OfficeRef {
                id,
                office,
                latitude,
                longitude,
            })
            .collect())
    }

    fn least_loaded(&self, office: &str, limit: i64) -> Result<Vec<ManagerSlot>, StoreError> {
        let mut conn = self.conn()?;
        let rows = managers::table
            .filter(managers::office.eq(office))
            .select((managers::id, managers::name, managers::current_load))
            .order((managers::current_load.asc(), managers::id.asc()))
            .limit(limit)
            .load::<(i32, String, i32)>(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, current_load)| ManagerSlot {
                id,
                name,
                current_load,
            })
            .collect())
    }

    fn commit(&self, record: NewAssignment) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let manager_id = record.manager_id;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(assignments::table)
                .values(&record)
                .execute(conn)?;
            diesel::update(managers::table.filter(managers::id.eq(manager_id)))
                .set(managers::current_load.eq(managers::current_load + 1))
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }
}
