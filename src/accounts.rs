//! Queries on user accounts shared by the user, invitation and admin routes.

use anyhow::Context;
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::authentication::{generate_otp, hash_token};
use crate::domain::{Role, UserEmail};
use crate::notifications;

const PROFILE_COLUMNS: &str = "user_id, name, email, role, account_name, bring, \
    teams_member_count, focus, hear_about_as, active_status, created_at";

/// A user as exposed to clients. Never carries secrets.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub account_name: Option<String>,
    pub bring: Option<String>,
    pub teams_member_count: Option<String>,
    pub focus: Vec<String>,
    pub hear_about_as: Option<String>,
    pub active_status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UserProfile {
    pub fn role(&self) -> Result<Role, anyhow::Error> {
        self.role.parse::<Role>().map_err(|e| anyhow::anyhow!(e))
    }

    pub fn email(&self) -> Result<UserEmail, anyhow::Error> {
        self.email
            .parse::<UserEmail>()
            .map_err(|e| anyhow::anyhow!("Stored email is invalid: {e}"))
    }
}

pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub account_name: Option<&'a str>,
    pub bring: Option<&'a str>,
    pub teams_member_count: Option<&'a str>,
    pub focus: &'a [String],
    pub hear_about_as: Option<&'a str>,
}

#[instrument(name = "Get user profile", skip(executor))]
pub async fn get_profile<'c>(
    executor: impl PgExecutor<'c>,
    user_id: Uuid,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let query = format!("SELECT {PROFILE_COLUMNS} FROM users WHERE user_id = $1");
    sqlx::query_as::<_, UserProfile>(&query)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

#[instrument(name = "Find user by email", skip(executor))]
pub async fn find_profile_by_email<'c>(
    executor: impl PgExecutor<'c>,
    email: &UserEmail,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let query = format!("SELECT {PROFILE_COLUMNS} FROM users WHERE email = $1");
    sqlx::query_as::<_, UserProfile>(&query)
        .bind(email.as_ref())
        .fetch_optional(executor)
        .await
}

pub async fn email_taken<'c>(
    executor: impl PgExecutor<'c>,
    email: &UserEmail,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)",
    )
    .bind(email.as_ref())
    .fetch_one(executor)
    .await
}

#[instrument(
    name = "Insert user",
    skip(executor, user),
    fields(email = %user.email, role = %user.role)
)]
pub async fn insert_user<'c>(
    executor: impl PgExecutor<'c>,
    user: &NewUser<'_>,
) -> Result<Uuid, sqlx::Error> {
    let user_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users (
            user_id, name, email, password_hash, role, account_name, bring,
            teams_member_count, focus, hear_about_as
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(user_id)
    .bind(user.name)
    .bind(user.email)
    .bind(user.password_hash)
    .bind(user.role.as_str())
    .bind(user.account_name)
    .bind(user.bring)
    .bind(user.teams_member_count)
    .bind(user.focus)
    .bind(user.hear_about_as)
    .execute(executor)
    .await?;

    Ok(user_id)
}

#[instrument(name = "Set user role", skip(executor))]
pub async fn set_role<'c>(
    executor: impl PgExecutor<'c>,
    user_id: Uuid,
    role: Role,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE users SET role = $1, updated_at = NOW() WHERE user_id = $2",
    )
    .bind(role.as_str())
    .bind(user_id)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(updated > 0)
}

/// Replaces any OTP of the user with a fresh one and returns its plaintext.
#[instrument(name = "Issue OTP", skip(pool))]
pub async fn issue_otp(pool: &PgPool, user_id: Uuid) -> Result<u32, anyhow::Error> {
    let otp = generate_otp();
    let mut tx = pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    sqlx::query("DELETE FROM otps WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete previous OTPs")?;

    sqlx::query(
        "INSERT INTO otps (otp_id, user_id, otp_hash) VALUES ($1, $2, $3)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(hash_token(&otp.to_string()))
    .execute(&mut *tx)
    .await
    .context("Failed to store the OTP")?;

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to store an OTP.")?;

    Ok(otp)
}

/// Issues an OTP and emails it. Fails when the email cannot be delivered.
#[instrument(name = "Issue and send OTP", skip(app_state, user), fields(user_id = %user.user_id))]
pub async fn send_login_otp(
    app_state: &AppState,
    user: &UserProfile,
) -> Result<(), anyhow::Error> {
    let otp = issue_otp(&app_state.pool, user.user_id).await?;
    let notification =
        notifications::otp(&user.name, otp, app_state.auth.otp_ttl_minutes);

    app_state
        .email_client
        .send_email(
            &user.email()?,
            &notification.subject,
            &notification.text,
            &notification.html,
        )
        .await
        .context("Failed to send the OTP email")
}

/// Same as [`send_login_otp`] but only logs failures.
pub async fn send_login_otp_best_effort(app_state: &AppState, user: &UserProfile) {
    if let Err(e) = send_login_otp(app_state, user).await {
        tracing::warn!(
            error.cause_chain = ?e,
            user_id = %user.user_id,
            "Failed to issue a verification code"
        );
    }
}
