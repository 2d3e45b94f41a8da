use std::sync::Arc;

use anyhow::Context;
use axum::{Json, extract::State, http::StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    accounts::email_taken,
    app_state::AppState,
    authentication::hash_password,
    domain::{Password, RegistrationStatus, Role, UserEmail, UserName},
    notifications,
    utils::{AppError, JsonBody, non_blank},
};

const MIN_REASON_LENGTH: usize = 10;

#[derive(Deserialize, Debug)]
pub struct RegisterBody {
    name: UserName,
    email: UserEmail,
    password: Password,
    company_name: String,
    reason: String,
    team_size: String,
    account_name: Option<String>,
    bring: Option<String>,
    teams_member_count: Option<String>,
    #[serde(default)]
    focus: Vec<String>,
    hear_about_as: Option<String>,
    role: Option<Role>,
}

impl RegisterBody {
    fn validate(&self) -> Result<(), AppError> {
        if self.company_name.trim().is_empty() {
            return Err(AppError::Validation("Company name is required".into()));
        }
        if self.reason.trim().chars().count() < MIN_REASON_LENGTH {
            return Err(AppError::Validation(format!(
                "Please provide a detailed reason for access \
                (minimum {MIN_REASON_LENGTH} characters)"
            )));
        }
        if self.team_size.trim().is_empty() {
            return Err(AppError::Validation("Team size is required".into()));
        }
        if self.role == Some(Role::Admin) {
            return Err(AppError::Validation(
                "Invalid role. Must be one of: CLIENT, PROVIDER, BILLER, TEAM"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct RegisterResponse {
    success: bool,
    message: &'static str,
    data: RegistrationData,
}

#[derive(Serialize)]
struct RegistrationData {
    request_id: Uuid,
    status: RegistrationStatus,
    message: &'static str,
}

#[instrument(
    name = "Submit a registration request",
    skip(app_state, body),
    fields(email = %body.email)
)]
pub(crate) async fn register(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<RegisterBody>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    body.validate()?;

    if email_taken(&app_state.pool, &body.email).await? {
        return Err(AppError::bad_request("User already exists with this email"));
    }

    match existing_request_status(&app_state.pool, &body.email).await? {
        Some(RegistrationStatus::Pending) => {
            return Err(AppError::bad_request(
                "A registration request is already pending for this email",
            ));
        }
        Some(RegistrationStatus::Approved) => {
            return Err(AppError::bad_request(
                "Your registration has already been approved. Please login instead.",
            ));
        }
        Some(RegistrationStatus::Rejected) | None => {}
    }

    let password_hash = hash_password(body.password.to_secret()).await?;
    let request_id = upsert_request(
        &app_state.pool,
        &body,
        password_hash.expose_secret(),
    )
    .await?
    // A concurrent registration for the same email won the race.
    .ok_or_else(|| {
        AppError::bad_request(
            "A registration request is already pending for this email",
        )
    })?;

    notifications::send_best_effort(
        &app_state.email_client,
        &body.email,
        notifications::registration_pending(body.name.as_ref()),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: "Your registration request has been submitted successfully \
                and is pending admin approval. You will receive an email \
                notification once your request is approved.",
            data: RegistrationData {
                request_id,
                status: RegistrationStatus::Pending,
                message: "Please wait for admin approval before you can login.",
            },
        }),
    ))
}

#[instrument(name = "Get existing registration request", skip(pool))]
async fn existing_request_status(
    pool: &PgPool,
    email: &UserEmail,
) -> Result<Option<RegistrationStatus>, anyhow::Error> {
    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM registration_requests WHERE email = $1",
    )
    .bind(email.as_ref())
    .fetch_optional(pool)
    .await
    .context("Failed to look up existing registration requests")?;

    status
        .map(|s| s.parse::<RegistrationStatus>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()
}

/// Inserts a PENDING request, or resets a REJECTED one for the same email.
/// Returns `None` when a non rejected request already holds the email.
#[instrument(name = "Store registration request", skip(pool, body, password_hash))]
async fn upsert_request(
    pool: &PgPool,
    body: &RegisterBody,
    password_hash: &str,
) -> Result<Option<Uuid>, anyhow::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO registration_requests (
            request_id, name, email, password_hash, account_name, bring,
            teams_member_count, focus, hear_about_as, requested_role,
            company_name, reason, team_size, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (email) DO UPDATE
        SET name = EXCLUDED.name,
            password_hash = EXCLUDED.password_hash,
            account_name = EXCLUDED.account_name,
            bring = EXCLUDED.bring,
            teams_member_count = EXCLUDED.teams_member_count,
            focus = EXCLUDED.focus,
            hear_about_as = EXCLUDED.hear_about_as,
            requested_role = EXCLUDED.requested_role,
            company_name = EXCLUDED.company_name,
            reason = EXCLUDED.reason,
            team_size = EXCLUDED.team_size,
            status = EXCLUDED.status,
            admin_notes = NULL,
            approved_at = NULL,
            approved_by = NULL,
            created_at = NOW()
        WHERE registration_requests.status = 'REJECTED'
        RETURNING request_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(body.name.as_ref())
    .bind(body.email.as_ref())
    .bind(password_hash)
    .bind(non_blank(body.account_name.clone()))
    .bind(non_blank(body.bring.clone()))
    .bind(non_blank(body.teams_member_count.clone()))
    .bind(&body.focus)
    .bind(non_blank(body.hear_about_as.clone()))
    .bind(body.role.map(|r| r.as_str()))
    .bind(body.company_name.trim())
    .bind(body.reason.trim())
    .bind(body.team_size.trim())
    .bind(RegistrationStatus::Pending.as_str())
    .fetch_optional(pool)
    .await
    .context("Failed to store the registration request")
}
