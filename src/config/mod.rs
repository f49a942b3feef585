use anyhow::Context;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub geocode: GeocodeConfig,
    pub routing: RoutingConfig,
    pub auth: AuthConfig,
    pub prompts_path: String,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Connection string for the read-only role the guarded query
    /// pipeline executes against. Falls back to the primary URL.
    pub read_only_url: String,
}

#[derive(Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub stats_ttl_secs: u64,
}

#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub decide_timeout_secs: u64,
    pub analyze_timeout_secs: u64,
}

#[derive(Clone)]
pub struct GeocodeConfig {
    pub nominatim_url: String,
    pub user_agent: String,
    pub catalog_url: String,
    pub catalog_key: Option<String>,
}

#[derive(Clone)]
pub struct RoutingConfig {
    /// Office name used when a ticket carries no coordinates.
    pub default_office: String,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub cookie_name: String,
    pub token_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let read_only_url = match std::env::var("DATABASE_RO_URL") {
            Ok(v) => v,
            Err(_) => {
                log::warn!("DATABASE_RO_URL not set, guarded queries will use the primary role");
                database_url.clone()
            }
        };

        Ok(AppConfig {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: std::env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            database: DatabaseConfig {
                url: database_url,
                read_only_url,
            },
            cache: CacheConfig {
                redis_url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1/".to_string()),
                stats_ttl_secs: std::env::var("STATS_CACHE_TTL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            },
            llm: LlmConfig {
                base_url: std::env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
                api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
                model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "qwen2.5:14b".to_string()),
                decide_timeout_secs: std::env::var("LLM_DECIDE_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
                analyze_timeout_secs: std::env::var("LLM_ANALYZE_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15),
            },
            geocode: GeocodeConfig {
                nominatim_url: std::env::var("NOMINATIM_URL")
                    .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
                user_agent: std::env::var("GEOCODE_USER_AGENT")
                    .unwrap_or_else(|_| "deskserver/1.0".to_string()),
                catalog_url: std::env::var("CATALOG_GEO_URL")
                    .unwrap_or_else(|_| "https://catalog.api.2gis.com/3.0".to_string()),
                catalog_key: std::env::var("CATALOG_GEO_KEY").ok(),
            },
            routing: RoutingConfig {
                default_office: std::env::var("DEFAULT_OFFICE")
                    .unwrap_or_else(|_| "HQ".to_string()),
            },
            auth: AuthConfig {
                jwt_secret: std::env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "super-secret-key-change-me".to_string()),
                cookie_name: std::env::var("AUTH_COOKIE")
                    .unwrap_or_else(|_| "auth_token".to_string()),
                token_ttl_hours: std::env::var("TOKEN_TTL_HOURS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(24),
            },
            prompts_path: std::env::var("PROMPTS_PATH")
                .unwrap_or_else(|_| "prompts.toml".to_string()),
        })
    }
}
