use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authentication::JwtError;
use crate::domain::Role;
use crate::utils::AppError;

pub const TOKEN_COOKIE: &str = "token";

/// The caller of a protected route, loaded from the database on every request.
#[derive(Clone, Debug, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub async fn reject_anonymous_users(
    State(app_state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(request.headers()) else {
        tracing::info!("Anonymous user attempted to access a protected route.");
        return AppError::Unauthorized("Unauthorized user".into())
            .into_response();
    };

    let claims = match app_state.jwt.decode(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::info!("Rejected bearer token: {e}");
            let message = match e {
                JwtError::Expired => "Token expired",
                JwtError::Invalid(_) => "Invalid token",
            };
            return AppError::Unauthorized(message.into()).into_response();
        }
    };

    match load_user(&app_state.pool, claims.sub).await {
        Ok(Some(user)) => {
            tracing::debug!("Authenticated user with ID: {}", user.user_id);
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) => AppError::not_found("User not found").into_response(),
        Err(e) => e.into_response(),
    }
}

/// Must be layered inside [`reject_anonymous_users`].
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<AuthenticatedUser>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(user) => {
            tracing::warn!(
                user_id = %user.user_id,
                "Non-admin user attempted to access an admin route."
            );
            AppError::forbidden("Admin access required").into_response()
        }
        None => AppError::Unauthorized("Unauthorized user".into())
            .into_response(),
    }
}

#[tracing::instrument(name = "Load authenticated user", skip(pool))]
async fn load_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let row: Option<(Uuid, String, String, String)> = sqlx::query_as(
        r#"
        SELECT user_id, name, email, role
        FROM users
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|(user_id, name, email, role)| {
        let role = role
            .parse::<Role>()
            .map_err(|e| AppError::E500(anyhow::anyhow!(e)))?;
        Ok(AuthenticatedUser {
            user_id,
            name,
            email,
            role,
        })
    })
    .transpose()
}

/// Bearer header first, then the `token` cookie.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(
    token: &str,
    max_age: time::Duration,
    secure: bool,
) -> HeaderValue {
    cookie_header(token, max_age.whole_seconds(), secure)
}

pub fn expired_session_cookie(secure: bool) -> HeaderValue {
    cookie_header("", 0, secure)
}

fn cookie_header(value: &str, max_age: i64, secure: bool) -> HeaderValue {
    // SameSite=None is only honoured by browsers together with Secure.
    let same_site = if secure { "; SameSite=None; Secure" } else { "; SameSite=Lax" };
    let cookie = format!(
        "{TOKEN_COOKIE}={value}; Path=/; HttpOnly; Max-Age={max_age}{same_site}"
    );
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| {
        HeaderValue::from_static("token=; Path=/; HttpOnly; Max-Age=0")
    })
}
