use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tracing::instrument;

use crate::configuration::Settings;

/// Periodically drops OTPs past their TTL, expired invitations and stale
/// password-reset tokens.
pub struct ExpiredTokenWorker {
    pool: PgPool,
    interval: Duration,
    otp_ttl: time::Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub otps: u64,
    pub invitations: u64,
    pub reset_tokens: u64,
}

impl ExpiredTokenWorker {
    pub fn build(settings: &Settings) -> Self {
        let pool = PgPoolOptions::new()
            .connect_lazy_with(settings.database.connect_options());
        Self {
            pool,
            interval: Duration::from_secs(settings.app_settings.cleanup_interval),
            otp_ttl: settings.auth.otp_ttl(),
        }
    }

    pub async fn run_until_stop(self) -> Result<(), anyhow::Error> {
        work_loop(self.pool, self.interval, self.otp_ttl).await
    }
}

#[instrument(skip_all)]
async fn work_loop(
    pool: PgPool,
    interval: Duration,
    otp_ttl: time::Duration,
) -> Result<(), anyhow::Error> {
    loop {
        match sweep_expired_tokens(&pool, otp_ttl).await {
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "failed to sweep expired tokens"
                )
            }
            Ok(report) => tracing::info!(
                otps = report.otps,
                invitations = report.invitations,
                reset_tokens = report.reset_tokens,
                "expired tokens are cleaned"
            ),
        }

        tokio::time::sleep(interval).await;
    }
}

#[instrument(skip(pool))]
pub async fn sweep_expired_tokens(
    pool: &PgPool,
    otp_ttl: time::Duration,
) -> Result<SweepReport, anyhow::Error> {
    let now = OffsetDateTime::now_utc();

    let otps = sqlx::query("DELETE FROM otps WHERE created_at < $1")
        .bind(now - otp_ttl)
        .execute(pool)
        .await
        .context("Failed to delete expired OTPs")?
        .rows_affected();

    let invitations = sqlx::query("DELETE FROM invitations WHERE expires_at < $1")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired invitations")?
        .rows_affected();

    let reset_tokens = sqlx::query(
        r#"
        UPDATE users
        SET reset_token_hash = NULL, reset_token_expires_at = NULL
        WHERE reset_token_expires_at < $1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to clear expired reset tokens")?
    .rows_affected();

    Ok(SweepReport {
        otps,
        invitations,
        reset_tokens,
    })
}
