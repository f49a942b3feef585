use std::sync::Arc;

use crate::config::AppConfig;
use crate::geo::GeoResolver;
use crate::insights::ChatPipeline;
use crate::routing::AssignmentEngine;
use crate::shared::utils::DbPool;

/// Shared application state handed to every handler.
pub struct AppState {
    pub conn: DbPool,
    pub read_conn: DbPool,
    pub cache: redis::Client,
    pub config: AppConfig,
    pub geo: Arc<dyn GeoResolver>,
    pub assignment: Arc<AssignmentEngine>,
    pub pipeline: Arc<ChatPipeline>,
}
