mod jwt;
mod middleware;

pub use jwt::{Claims, JwtError, JwtKeys};
pub use middleware::{
    AuthenticatedUser, TOKEN_COOKIE, expired_session_cookie,
    reject_anonymous_users, require_admin, session_cookie,
};

use anyhow::Context;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier,
    Version,
};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::UserEmail;
use crate::telemetry::spawn_blocking_with_tracing;

pub struct Credentials {
    pub email: UserEmail,
    pub password: SecretString,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials.")]
    InvalidCredentials(#[source] anyhow::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

#[instrument(name = "Validate credentials", skip(pool, credentials))]
pub async fn validate_credentials(
    pool: &PgPool,
    credentials: Credentials,
) -> Result<Uuid, AuthError> {
    let mut user_id = None;
    // Unknown emails still pay for a hash verification.
    let mut expected_password_hash = SecretString::from(
        "$argon2id$v=19$m=15000,t=2,p=1$\
        gZiV/M1gPc22ElAH/Jh1Hw$\
        CWOrkoo7oJBQ/iyh7uJ0LO2aLEfrHwTWllSAxT0zRno"
            .to_string(),
    );

    if let Some((stored_user_id, stored_password_hash)) =
        get_stored_credentials(pool, &credentials.email)
            .await
            .map_err(AuthError::UnexpectedError)?
    {
        user_id = Some(stored_user_id);
        expected_password_hash = stored_password_hash;
    }

    verify_password(credentials.password, expected_password_hash).await?;

    user_id.ok_or_else(|| {
        AuthError::InvalidCredentials(anyhow::anyhow!("Unknown email"))
    })
}

#[instrument(name = "Get stored credentials", skip(pool, email))]
async fn get_stored_credentials(
    pool: &PgPool,
    email: &UserEmail,
) -> Result<Option<(Uuid, SecretString)>, anyhow::Error> {
    let row: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT user_id, password_hash
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email.as_ref())
    .fetch_optional(pool)
    .await
    .context("Failed to perform a query to validate auth credentials.")?;

    Ok(row.map(|(user_id, hash)| (user_id, SecretString::from(hash))))
}

/// Checks a candidate against a stored PHC string off the async runtime.
pub async fn verify_password(
    password_candidate: SecretString,
    expected_password_hash: SecretString,
) -> Result<(), AuthError> {
    spawn_blocking_with_tracing(move || {
        verify_password_hash(password_candidate, expected_password_hash)
    })
    .await
    .context("Failed to spawn blocking task")
    .map_err(AuthError::UnexpectedError)?
}

#[instrument(
    name = "Verify password hash",
    skip(expected_password_hash, password_candidate)
)]
fn verify_password_hash(
    password_candidate: SecretString,
    expected_password_hash: SecretString,
) -> Result<(), AuthError> {
    let expected_password_hash =
        PasswordHash::new(expected_password_hash.expose_secret())
            .context("Failed to parse stored password hash")
            .map_err(AuthError::UnexpectedError)?;

    Argon2::default()
        .verify_password(
            password_candidate.expose_secret().as_bytes(),
            &expected_password_hash,
        )
        .context("Invalid password.")
        .map_err(AuthError::InvalidCredentials)
}

/// Produces an Argon2id PHC string for storage.
pub async fn hash_password(
    password: SecretString,
) -> Result<SecretString, anyhow::Error> {
    spawn_blocking_with_tracing(move || compute_password_hash(password))
        .await
        .context("Failed to spawn blocking task")?
}

fn compute_password_hash(
    password: SecretString,
) -> Result<SecretString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(15000, 2, 1, None)
            .map_err(|e| anyhow::anyhow!("Invalid argon2 parameters: {e}"))?,
    )
    .hash_password(password.expose_secret().as_bytes(), &salt)
    .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?
    .to_string();

    Ok(SecretString::from(password_hash))
}

#[instrument(name = "Change password", skip(password, pool))]
pub async fn change_password(
    user_id: Uuid,
    password: SecretString,
    pool: &PgPool,
) -> Result<(), anyhow::Error> {
    let password_hash = hash_password(password).await?;

    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1,
            reset_token_hash = NULL,
            reset_token_expires_at = NULL,
            updated_at = NOW()
        WHERE user_id = $2
        "#,
    )
    .bind(password_hash.expose_secret())
    .bind(user_id)
    .execute(pool)
    .await
    .context("Failed to change user's password in the database.")?;

    Ok(())
}

/// Six digit one-time password.
pub fn generate_otp() -> u32 {
    rand::rng().random_range(100_000..=999_999)
}

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of a secret, hex encoded. OTPs and tokens are stored this way.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
