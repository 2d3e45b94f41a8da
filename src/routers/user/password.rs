use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Json, extract::State};
use secrecy::SecretString;
use serde::Deserialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    accounts::find_profile_by_email,
    app_state::AppState,
    authentication::{
        self, AuthError, AuthenticatedUser, Credentials, generate_token,
        hash_token, validate_credentials,
    },
    domain::{Password, UserEmail},
    notifications,
    utils::{AppError, JsonBody, MessageResponse},
};

const RESET_LINK_SENT: &str =
    "If an account with that email exists, a password reset link has been sent.";

#[derive(Deserialize)]
pub struct ForgotPasswordBody {
    email: UserEmail,
}

#[instrument(
    name = "Request a password reset",
    skip(app_state, body),
    fields(email = %body.email)
)]
pub(crate) async fn forgot_password(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<ForgotPasswordBody>,
) -> Result<Json<MessageResponse>, AppError> {
    let Some(user) = find_profile_by_email(&app_state.pool, &body.email).await?
    else {
        tracing::info!("Password reset requested for an unknown email");
        return Ok(MessageResponse::ok(RESET_LINK_SENT));
    };

    let token = generate_token();
    let expires_at = OffsetDateTime::now_utc() + app_state.auth.reset_token_ttl();
    store_reset_token(&app_state.pool, user.user_id, Some((&hash_token(&token), expires_at)))
        .await?;

    let reset_link = app_state.link(&format!("/reset-password?token={token}"));
    let notification = notifications::password_reset(
        &user.name,
        &reset_link,
        app_state.auth.reset_token_ttl_minutes,
    );

    if let Err(e) = app_state
        .email_client
        .send_email(
            &body.email,
            &notification.subject,
            &notification.text,
            &notification.html,
        )
        .await
    {
        // An undeliverable token must not stay usable.
        if let Err(cleanup) =
            store_reset_token(&app_state.pool, user.user_id, None).await
        {
            tracing::error!(
                error.cause_chain = ?cleanup,
                "Failed to clear a reset token after an email failure"
            );
        }
        return Err(AppError::E500(
            e.context("Failed to send password reset email"),
        ));
    }

    Ok(MessageResponse::ok(RESET_LINK_SENT))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordBody {
    token: String,
    new_password: Password,
}

#[instrument(name = "Reset password", skip(app_state, body))]
pub(crate) async fn reset_password(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<ResetPasswordBody>,
) -> Result<Json<MessageResponse>, AppError> {
    let user_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM users
        WHERE reset_token_hash = $1 AND reset_token_expires_at > NOW()
        "#,
    )
    .bind(hash_token(body.token.trim()))
    .fetch_optional(&app_state.pool)
    .await?;

    let user_id = user_id
        .ok_or_else(|| AppError::bad_request("Invalid or expired reset token"))?;

    authentication::change_password(
        user_id,
        body.new_password.into_secret(),
        &app_state.pool,
    )
    .await?;

    Ok(MessageResponse::ok("Password has been reset successfully"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
    current_password: SecretString,
    new_password: Password,
}

#[instrument(
    name = "Change password",
    skip(app_state, user, body),
    fields(user_id = %user.user_id)
)]
pub(crate) async fn change_password(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<ChangePasswordBody>,
) -> Result<Json<MessageResponse>, AppError> {
    let credentials = Credentials {
        email: user
            .email
            .parse()
            .map_err(|e| anyhow::anyhow!("Stored email is invalid: {e}"))?,
        password: body.current_password,
    };

    match validate_credentials(&app_state.pool, credentials).await {
        Ok(_) => {}
        Err(AuthError::InvalidCredentials(_)) => {
            return Err(AppError::forbidden("Current password is incorrect"));
        }
        Err(AuthError::UnexpectedError(e)) => return Err(AppError::E500(e)),
    }

    authentication::change_password(
        user.user_id,
        body.new_password.into_secret(),
        &app_state.pool,
    )
    .await?;

    Ok(MessageResponse::ok("Password updated successfully"))
}

/// Stores the hash and expiry of a reset token, or clears both.
#[instrument(name = "Store reset token", skip(pool, token))]
async fn store_reset_token(
    pool: &PgPool,
    user_id: Uuid,
    token: Option<(&str, OffsetDateTime)>,
) -> Result<(), anyhow::Error> {
    let (hash, expires_at) = token.unzip();
    sqlx::query(
        r#"
        UPDATE users
        SET reset_token_hash = $1, reset_token_expires_at = $2
        WHERE user_id = $3
        "#,
    )
    .bind(hash)
    .bind(expires_at)
    .bind(user_id)
    .execute(pool)
    .await
    .context("Failed to store the password reset token")?;

    Ok(())
}
