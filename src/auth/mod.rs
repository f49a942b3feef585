use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_cookies::{Cookie, Cookies};

use crate::shared::schema::{managers, users};
use crate::shared::state::AppState;
use crate::shared::utils::DbPool;

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_MANAGER: &str = "MANAGER";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub company_id: i32,
    pub role: String,
    pub exp: usize,
}

/// Authenticated caller, decoded from the JWT auth cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i32,
    pub company_id: i32,
    pub role: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let unauthorized = || (StatusCode::UNAUTHORIZED, "Unauthorized".to_string());
        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|_| unauthorized())?;
        let token = cookies
            .get(&state.config.auth.cookie_name)
            .map(|c| c.value().to_string())
            .ok_or_else(unauthorized)?;
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(state.config.auth.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| unauthorized())?;
        Ok(AuthUser {
            user_id: data.claims.sub,
            company_id: data.claims.company_id,
            role: data.claims.role,
        })
    }
}

/// Resolve the manager record backing a MANAGER-role user, if any.
pub fn manager_id_for_user(pool: &DbPool, user_id: i32) -> Option<i32> {
    let mut conn = pool.get().ok()?;
    managers::table
        .filter(managers::user_id.eq(user_id))
        .select(managers::id)
        .first::<i32>(&mut conn)
        .ok()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub role: String,
    pub company_id: i32,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> Result<Json<MeResponse>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let user: crate::shared::models::User = users::table
        .filter(users::email.eq(&req.email))
        .first(&mut conn)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

    let parsed = PasswordHash::new(&user.password_hash)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

    let claims = Claims {
        sub: user.id,
        company_id: user.company_id,
        role: user.role.clone(),
        exp: (Utc::now() + Duration::hours(state.config.auth.token_ttl_hours)).timestamp()
            as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.config.auth.jwt_secret.as_bytes()),
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Token error: {e}")))?;

    let mut cookie = Cookie::new(state.config.auth.cookie_name.clone(), token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookies.add(cookie);

    Ok(Json(MeResponse {
        user_id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        company_id: user.company_id,
    }))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<MeResponse>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;
    let row: crate::shared::models::User = users::table
        .filter(users::id.eq(user.user_id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()))?;
    Ok(Json(MeResponse {
        user_id: row.id,
        name: row.name,
        email: row.email,
        role: row.role,
        company_id: row.company_id,
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> StatusCode {
    let mut cookie = Cookie::new(state.config.auth.cookie_name.clone(), String::new());
    cookie.set_path("/");
    cookie.make_removal();
    cookies.add(cookie);
    StatusCode::NO_CONTENT
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}
