use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use super::overview::DataResponse;
use crate::{
    accounts::{NewUser, email_taken, get_profile, insert_user, send_login_otp_best_effort},
    app_state::AppState,
    authentication::AuthenticatedUser,
    domain::{RegistrationStatus, Role, UserEmail},
    invitations::apply_pending_invitation,
    notifications,
    utils::{AppError, JsonBody, PageQuery, Pagination, non_blank},
};

const DEFAULT_REQUEST_PAGE_SIZE: i64 = 10;

const REQUEST_COLUMNS: &str = "request_id, name, email, password_hash, account_name, \
    bring, teams_member_count, focus, hear_about_as, requested_role, company_name, \
    reason, team_size, status, admin_notes, approved_at, approved_by, created_at";

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct RegistrationRequest {
    request_id: Uuid,
    name: String,
    email: String,
    #[serde(skip_serializing)]
    password_hash: String,
    account_name: Option<String>,
    bring: Option<String>,
    teams_member_count: Option<String>,
    focus: Vec<String>,
    hear_about_as: Option<String>,
    requested_role: Option<String>,
    company_name: String,
    reason: String,
    team_size: String,
    status: String,
    admin_notes: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    approved_at: Option<OffsetDateTime>,
    approved_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl RegistrationRequest {
    fn status(&self) -> Result<RegistrationStatus, anyhow::Error> {
        self.status
            .parse::<RegistrationStatus>()
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn email(&self) -> Result<UserEmail, anyhow::Error> {
        self.email
            .parse::<UserEmail>()
            .map_err(|e| anyhow::anyhow!("Stored email is invalid: {e}"))
    }
}

#[instrument(name = "List pending registration requests", skip(app_state))]
pub(crate) async fn pending_requests(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<DataResponse<Vec<RegistrationRequest>>>, AppError> {
    let query = format!(
        "SELECT {REQUEST_COLUMNS} FROM registration_requests \
        WHERE status = $1 ORDER BY created_at DESC"
    );
    let requests = sqlx::query_as::<_, RegistrationRequest>(&query)
        .bind(RegistrationStatus::Pending.as_str())
        .fetch_all(&app_state.pool)
        .await?;

    Ok(DataResponse::ok(requests))
}

#[derive(Deserialize, Debug)]
pub struct RequestsQuery {
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

impl RequestsQuery {
    fn window(&self) -> (i64, i64) {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
        .window(DEFAULT_REQUEST_PAGE_SIZE)
    }

    /// `None` lists every status, `ALL` included.
    fn status_filter(&self) -> Result<Option<RegistrationStatus>, AppError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("ALL") => Ok(None),
            Some(status) => status
                .parse::<RegistrationStatus>()
                .map(Some)
                .map_err(AppError::bad_request),
        }
    }
}

#[derive(Serialize)]
pub struct RequestsPage {
    success: bool,
    data: Vec<RegistrationRequest>,
    pagination: Pagination,
}

#[instrument(name = "List registration requests", skip(app_state))]
pub(crate) async fn list_requests(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<RequestsQuery>,
) -> Result<Json<RequestsPage>, AppError> {
    let status = query.status_filter()?.map(|s| s.as_str());
    let (page, limit) = query.window();

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM registration_requests WHERE $1::TEXT IS NULL OR status = $1",
    )
    .bind(status)
    .fetch_one(&app_state.pool)
    .await?;
    let pagination = Pagination::new(page, limit, total);

    let sql = format!(
        r#"
        SELECT {REQUEST_COLUMNS}
        FROM registration_requests
        WHERE $1::TEXT IS NULL OR status = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    );
    let data = sqlx::query_as::<_, RegistrationRequest>(&sql)
        .bind(status)
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&app_state.pool)
        .await?;

    Ok(Json(RequestsPage {
        success: true,
        data,
        pagination,
    }))
}

#[instrument(name = "Get registration request", skip(app_state))]
pub(crate) async fn get_request(
    State(app_state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<DataResponse<RegistrationRequest>>, AppError> {
    let request = find_request(&app_state.pool, request_id)
        .await?
        .ok_or_else(request_not_found)?;
    Ok(DataResponse::ok(request))
}

#[derive(Deserialize, Debug)]
pub struct DecisionBody {
    request_id: Uuid,
    admin_notes: Option<String>,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    success: bool,
    message: &'static str,
    data: RegistrationRequest,
}

/// Approves a PENDING request: the account is created from it and any
/// invitation waiting for its email is applied, all in one transaction.
/// The OTP and the approval email are sent afterwards, best effort.
#[instrument(
    name = "Approve registration request",
    skip(app_state, admin, body),
    fields(admin_id = %admin.user_id, request_id = %body.request_id)
)]
pub(crate) async fn approve_request(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<DecisionBody>,
) -> Result<Json<DecisionResponse>, AppError> {
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let request = lock_pending_request(
        &mut tx,
        body.request_id,
        RegistrationStatus::Approved,
    )
    .await?;
    let email = request.email()?;
    if email_taken(&mut *tx, &email).await? {
        return Err(AppError::bad_request("User already exists with this email"));
    }

    let request = record_decision(
        &mut *tx,
        request.request_id,
        RegistrationStatus::Approved,
        non_blank(body.admin_notes).as_deref(),
        admin.user_id,
    )
    .await?;

    let user_id = insert_user(
        &mut *tx,
        &NewUser {
            name: &request.name,
            email: email.as_ref(),
            password_hash: &request.password_hash,
            role: Role::Provider,
            account_name: request.account_name.as_deref(),
            bring: request.bring.as_deref(),
            teams_member_count: request.teams_member_count.as_deref(),
            focus: &request.focus,
            hear_about_as: request.hear_about_as.as_deref(),
        },
    )
    .await?;
    apply_pending_invitation(&mut tx, user_id, &email).await?;

    let user = get_profile(&mut *tx, user_id)
        .await?
        .context("Approved user is missing")?;
    tx.commit()
        .await
        .context("Failed to commit SQL transaction to approve a registration.")?;

    tracing::info!(user_id = %user_id, "Registration approved");

    send_login_otp_best_effort(&app_state, &user).await;
    notifications::send_best_effort(
        &app_state.email_client,
        &email,
        notifications::registration_approved(&user.name, &app_state.link("/login")),
    )
    .await;

    Ok(Json(DecisionResponse {
        success: true,
        message: "User registration request approved successfully",
        data: request,
    }))
}

#[instrument(
    name = "Reject registration request",
    skip(app_state, admin, body),
    fields(admin_id = %admin.user_id, request_id = %body.request_id)
)]
pub(crate) async fn reject_request(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<DecisionBody>,
) -> Result<Json<DecisionResponse>, AppError> {
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let request = lock_pending_request(
        &mut tx,
        body.request_id,
        RegistrationStatus::Rejected,
    )
    .await?;
    let admin_notes = non_blank(body.admin_notes);
    let request = record_decision(
        &mut *tx,
        request.request_id,
        RegistrationStatus::Rejected,
        admin_notes.as_deref(),
        admin.user_id,
    )
    .await?;

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to reject a registration.")?;

    notifications::send_best_effort(
        &app_state.email_client,
        &request.email()?,
        notifications::registration_rejected(&request.name, admin_notes.as_deref()),
    )
    .await;

    Ok(Json(DecisionResponse {
        success: true,
        message: "User registration request rejected successfully",
        data: request,
    }))
}

/// Loads the request for update and checks it can move to `next`.
async fn lock_pending_request(
    tx: &mut Transaction<'_, Postgres>,
    request_id: Uuid,
    next: RegistrationStatus,
) -> Result<RegistrationRequest, AppError> {
    let query = format!(
        "SELECT {REQUEST_COLUMNS} FROM registration_requests \
        WHERE request_id = $1 FOR UPDATE"
    );
    let request = sqlx::query_as::<_, RegistrationRequest>(&query)
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(request_not_found)?;

    if !request.status()?.can_transition_to(next) {
        return Err(AppError::bad_request("Request is not pending"));
    }
    Ok(request)
}

async fn record_decision<'c>(
    executor: impl PgExecutor<'c>,
    request_id: Uuid,
    status: RegistrationStatus,
    admin_notes: Option<&str>,
    admin_id: Uuid,
) -> Result<RegistrationRequest, sqlx::Error> {
    let query = format!(
        r#"
        UPDATE registration_requests
        SET status = $1, admin_notes = $2, approved_at = NOW(), approved_by = $3
        WHERE request_id = $4
        RETURNING {REQUEST_COLUMNS}
        "#
    );
    sqlx::query_as::<_, RegistrationRequest>(&query)
        .bind(status.as_str())
        .bind(admin_notes)
        .bind(admin_id)
        .bind(request_id)
        .fetch_one(executor)
        .await
}

async fn find_request<'c>(
    executor: impl PgExecutor<'c>,
    request_id: Uuid,
) -> Result<Option<RegistrationRequest>, sqlx::Error> {
    let query =
        format!("SELECT {REQUEST_COLUMNS} FROM registration_requests WHERE request_id = $1");
    sqlx::query_as::<_, RegistrationRequest>(&query)
        .bind(request_id)
        .fetch_optional(executor)
        .await
}

fn request_not_found() -> AppError {
    AppError::not_found("Registration request not found")
}
