use axum::routing::get;
use axum::Router;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use deskserver::auth::configure_auth_routes;
use deskserver::business_units::configure_business_units_routes;
use deskserver::config::AppConfig;
use deskserver::geo::HttpGeoResolver;
use deskserver::insights::guard::{QueryGuard, DEFAULT_DENYLIST};
use deskserver::insights::prompts::Prompts;
use deskserver::insights::{configure_insights_routes, ChatPipeline};
use deskserver::llm::OpenAiCompatClient;
use deskserver::managers::configure_managers_routes;
use deskserver::routing::rotation::RedisRotation;
use deskserver::routing::store::PgWorkloadStore;
use deskserver::routing::{configure_routing_routes, AssignmentEngine};
use deskserver::shared::state::AppState;
use deskserver::shared::utils::create_pool;
use deskserver::stats::configure_stats_routes;
use deskserver::tickets::configure_tickets_routes;

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let prompts = Prompts::load(&config.prompts_path)?;

    let conn = create_pool(&config.database.url)?;
    let read_conn = create_pool(&config.database.read_only_url)?;
    let cache = redis::Client::open(config.cache.redis_url.clone())?;

    let geo = Arc::new(HttpGeoResolver::new(config.geocode.clone()));
    let model = Arc::new(OpenAiCompatClient::new(&config.llm));

    let assignment = Arc::new(AssignmentEngine::new(
        Arc::new(PgWorkloadStore::new(conn.clone())),
        Arc::new(RedisRotation::new(cache.clone())),
        config.routing.default_office.clone(),
    ));
    let pipeline = Arc::new(ChatPipeline::new(
        model,
        Arc::new(deskserver::insights::executor::PgReadOnlyExecutor::new(
            read_conn.clone(),
        )),
        QueryGuard::new(DEFAULT_DENYLIST),
        prompts,
        Duration::from_secs(config.llm.decide_timeout_secs),
        Duration::from_secs(config.llm.analyze_timeout_secs),
    ));

    let state = Arc::new(AppState {
        conn,
        read_conn,
        cache,
        config: config.clone(),
        geo,
        assignment,
        pipeline,
    });

    let app = Router::new()
        .route("/health", get(health))
        .merge(configure_auth_routes())
        .merge(configure_tickets_routes())
        .merge(configure_routing_routes())
        .merge(configure_managers_routes())
        .merge(configure_business_units_routes())
        .merge(configure_stats_routes())
        .merge(configure_insights_routes())
        .layer(CookieManagerLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("deskserver listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
