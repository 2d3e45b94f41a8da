use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    accounts::{UserProfile, find_profile_by_email, get_profile, send_login_otp},
    app_state::AppState,
    authentication::{
        AuthError, Credentials, expired_session_cookie, hash_token,
        session_cookie, validate_credentials,
    },
    domain::UserEmail,
    utils::{AppError, JsonBody, MessageResponse},
};

const INVALID_OTP: &str = "Invalid OTP or expired";

#[derive(Deserialize)]
pub struct LoginBody {
    email: UserEmail,
    password: SecretString,
}

#[instrument(
    name = "Login with password",
    skip(app_state, body),
    fields(email = %body.email, user_id = tracing::field::Empty)
)]
pub(crate) async fn login(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<LoginBody>,
) -> Result<Json<MessageResponse>, AppError> {
    let credentials = Credentials {
        email: body.email,
        password: body.password,
    };

    let user_id = match validate_credentials(&app_state.pool, credentials).await
    {
        Ok(user_id) => user_id,
        Err(AuthError::InvalidCredentials(e)) => {
            tracing::info!(error.cause_chain = ?e, "Rejected login attempt");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }
        Err(AuthError::UnexpectedError(e)) => return Err(AppError::E500(e)),
    };
    tracing::Span::current().record("user_id", tracing::field::display(&user_id));

    let user = get_profile(&app_state.pool, user_id)
        .await?
        .context("User vanished during login")?;
    send_login_otp(&app_state, &user).await?;

    Ok(MessageResponse::ok("OTP has been sent to your email."))
}

/// `email` narrows the code lookup to one account. Without it the most recent
/// matching code of any account is used.
#[derive(Deserialize)]
pub struct VerifyBody {
    email: Option<UserEmail>,
    #[serde(rename = "OTP")]
    otp: u32,
}

#[derive(Serialize)]
pub struct LoginResponse {
    success: bool,
    message: &'static str,
    user: UserProfile,
    token: String,
}

#[instrument(
    name = "Verify OTP",
    skip(app_state, body),
    fields(email = ?body.email, user_id = tracing::field::Empty)
)]
pub(crate) async fn verify(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<VerifyBody>,
) -> Result<Response, AppError> {
    let invalid = || AppError::Unauthorized(INVALID_OTP.into());

    let scope = match &body.email {
        Some(email) => Some(
            find_profile_by_email(&app_state.pool, email)
                .await?
                .ok_or_else(invalid)?
                .user_id,
        ),
        None => None,
    };

    let otp = find_otp(&app_state.pool, scope, &hash_token(&body.otp.to_string()))
        .await?
        .ok_or_else(invalid)?;
    tracing::Span::current().record("user_id", tracing::field::display(&otp.user_id));

    // The code is consumed whether it is still valid or not.
    delete_otp(&app_state.pool, otp.otp_id).await?;
    if otp.created_at + app_state.auth.otp_ttl() < OffsetDateTime::now_utc() {
        tracing::info!("Rejected an expired OTP");
        return Err(invalid());
    }

    let user = get_profile(&app_state.pool, otp.user_id)
        .await?
        .ok_or_else(invalid)?;

    let token = app_state.jwt.issue(user.user_id)?;
    let cookie = session_cookie(
        &token,
        app_state.jwt.ttl(),
        app_state.auth.secure_cookie,
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            success: true,
            message: "Login successfully",
            user,
            token,
        }),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct ResendOtpBody {
    email: UserEmail,
}

#[instrument(name = "Resend OTP", skip(app_state, body), fields(email = %body.email))]
pub(crate) async fn resend_otp(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<ResendOtpBody>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = find_profile_by_email(&app_state.pool, &body.email)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    send_login_otp(&app_state, &user).await?;

    Ok(MessageResponse::ok("A new OTP has been sent to your email."))
}

#[instrument(name = "Logout", skip(app_state))]
pub(crate) async fn logout(State(app_state): State<Arc<AppState>>) -> Response {
    (
        [(
            header::SET_COOKIE,
            expired_session_cookie(app_state.auth.secure_cookie),
        )],
        MessageResponse::ok("Logout successfully"),
    )
        .into_response()
}

#[derive(sqlx::FromRow)]
struct StoredOtp {
    otp_id: Uuid,
    user_id: Uuid,
    created_at: OffsetDateTime,
}

#[instrument(name = "Find OTP", skip(pool, otp_hash))]
async fn find_otp(
    pool: &PgPool,
    user_id: Option<Uuid>,
    otp_hash: &str,
) -> Result<Option<StoredOtp>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT otp_id, user_id, created_at
        FROM otps
        WHERE otp_hash = $2 AND ($1::uuid IS NULL OR user_id = $1)
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(otp_hash)
    .fetch_optional(pool)
    .await
}

async fn delete_otp(pool: &PgPool, otp_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM otps WHERE otp_id = $1")
        .bind(otp_id)
        .execute(pool)
        .await?;
    Ok(())
}
