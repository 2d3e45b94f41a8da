use axum::extract::FromRequest;
use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::routers::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("Something went wrong")]
    E500(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::E500(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        // A racing insert lost against a unique constraint.
        if let Some(db_error) = e.as_database_error() {
            if db_error.is_unique_violation() {
                tracing::info!(error.cause_chain = ?e, "Unique constraint violated");
                return Self::Conflict("Resource already exists".into());
            }
        }
        Self::E500(anyhow::Error::new(e).context("Database query failed"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            success: bool,
            message: String,
        }

        if let Self::E500(e) = &self {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "request failed with an unexpected error"
            );
        }

        let body = axum::Json(ErrorResponse {
            success: false,
            message: format!("{self}"),
        });

        let status_code = self.status_code();
        let mut response = (status_code, body).into_response();
        response
            .extensions_mut()
            .insert(std::sync::Arc::new(anyhow::anyhow!("{self:?}")));

        response
    }
}

/// `axum::Json` whose rejections render through [`AppError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

#[derive(Deserialize, Debug, Default)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub const MAX_PAGE_SIZE: i64 = 100;

/// Highest page whose offset still fits in an `i64` at any page size.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl PageQuery {
    /// Clamps the requested window: 1 ≤ page ≤ [`MAX_PAGE`], 1 ≤ limit ≤ 100.
    pub fn window(&self, default_limit: i64) -> (i64, i64) {
        let page = self.page.unwrap_or(1).clamp(1, MAX_PAGE);
        let limit = match self.limit {
            Some(limit) if limit > 0 => limit.min(MAX_PAGE_SIZE),
            _ => default_limit,
        };
        (page, limit)
    }
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: (total + limit - 1) / limit,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// `{"success": true, "message": ...}` body of actions without a payload.
#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> axum::Json<Self> {
        axum::Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Treats blank strings from optional form fields as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `ILIKE` pattern matching `search` anywhere, with its wildcards escaped.
pub fn ilike_pattern(search: Option<String>) -> Option<String> {
    non_blank(search).map(|term| {
        let escaped = term
            .trim()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    })
}
