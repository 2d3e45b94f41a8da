use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Json, extract::State, http::StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    accounts::{
        NewUser, UserProfile, email_taken, find_profile_by_email, get_profile,
        insert_user, send_login_otp_best_effort,
    },
    app_state::AppState,
    authentication::{AuthenticatedUser, hash_password},
    domain::{
        InvitationKind, InvitationToken, NewInvitation, Password, Role, TeamRole,
        UserEmail, UserName,
    },
    invitations::{self, InvitationLinkResponse, claim_invitation, issue_invitation},
    utils::{AppError, JsonBody, non_blank},
};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTeamInvitationBody {
    role: TeamRole,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
    #[serde(rename = "invited_email", alias = "invitedEmail")]
    invited_email: Option<UserEmail>,
}

#[instrument(
    name = "Generate team invitation",
    skip(app_state, user),
    fields(leader_id = %user.user_id)
)]
pub(crate) async fn generate_team_invitation(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<GenerateTeamInvitationBody>,
) -> Result<(StatusCode, Json<InvitationLinkResponse>), AppError> {
    let invitation = NewInvitation {
        token: InvitationToken::generate(),
        kind: InvitationKind::Team {
            role: body.role,
            project_id: None,
        },
        leader_id: user.user_id,
        legal_role: non_blank(body.legal_role),
        custom_legal_role: non_blank(body.custom_legal_role),
        invited_email: body.invited_email,
        expires_at: OffsetDateTime::now_utc() + app_state.auth.invitation_ttl(),
    };

    let response = issue_invitation(
        &app_state,
        &user,
        invitation,
        "Team invitation link generated successfully",
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize, Debug)]
pub struct JoinTeamBody {
    token: InvitationToken,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTeamResponse {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    requires_verification: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[instrument(name = "Join team", skip(app_state, user, body), fields(user_id = %user.user_id))]
pub(crate) async fn join_team(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<JoinTeamBody>,
) -> Result<(StatusCode, Json<JoinTeamResponse>), AppError> {
    let email: UserEmail = user
        .email
        .parse()
        .map_err(|e| anyhow::anyhow!("Stored email is invalid: {e}"))?;

    accept_team_invitation(&app_state, user.user_id, &email, &body.token).await?;

    Ok((
        StatusCode::CREATED,
        Json(JoinTeamResponse {
            success: true,
            message: "Successfully joined the team",
            requires_verification: None,
            email: None,
        }),
    ))
}

#[derive(Deserialize, Debug)]
pub struct JoinTeamWithInvitationBody {
    token: InvitationToken,
    email: UserEmail,
}

/// Public variant of [`join_team`] for an existing user who is not signed in.
#[instrument(
    name = "Join team with invitation",
    skip(app_state, body),
    fields(email = %body.email)
)]
pub(crate) async fn join_team_with_invitation(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<JoinTeamWithInvitationBody>,
) -> Result<(StatusCode, Json<JoinTeamResponse>), AppError> {
    let user = find_profile_by_email(&app_state.pool, &body.email)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    accept_team_invitation(&app_state, user.user_id, &body.email, &body.token)
        .await?;

    send_login_otp_best_effort(&app_state, &user).await;

    Ok((
        StatusCode::CREATED,
        Json(JoinTeamResponse {
            success: true,
            message: "Successfully joined the team. Please check your email for \
                OTP verification.",
            requires_verification: Some(true),
            email: Some(body.email.to_string()),
        }),
    ))
}

async fn accept_team_invitation(
    app_state: &AppState,
    user_id: uuid::Uuid,
    email: &UserEmail,
    token: &InvitationToken,
) -> Result<(), AppError> {
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let (invitation, kind) = claim_invitation(&mut tx, token, email).await?;
    let InvitationKind::Team { role, .. } = kind else {
        return Err(AppError::bad_request(
            "Client invitations must be accepted through the project join link",
        ));
    };
    invitations::join_team(&mut tx, user_id, &invitation, role).await?;

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to join a team.")?;
    Ok(())
}

#[derive(Deserialize, Debug)]
pub struct SignupBody {
    token: InvitationToken,
    name: UserName,
    email: UserEmail,
    password: Password,
}

#[derive(Serialize)]
pub struct SignupResponse {
    success: bool,
    message: &'static str,
    user: UserProfile,
}

/// Creates an account straight from a team invitation, bypassing approval.
#[instrument(name = "Sign up through team invitation", skip(app_state, body), fields(email = %body.email))]
pub(crate) async fn team_signup(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<SignupBody>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    let password_hash = hash_password(body.password.to_secret()).await?;
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let (invitation, kind) = claim_invitation(&mut tx, &body.token, &body.email).await?;
    let InvitationKind::Team { role, project_id } = kind else {
        return Err(AppError::bad_request(
            "This invitation is for clients. Use the client signup link instead",
        ));
    };
    ensure_email_free(&mut tx, &body.email).await?;

    let user_id = insert_user(
        &mut *tx,
        &NewUser {
            name: body.name.as_ref(),
            email: body.email.as_ref(),
            password_hash: password_hash.expose_secret(),
            role: role.into(),
            account_name: None,
            bring: None,
            teams_member_count: None,
            focus: &[],
            hear_about_as: None,
        },
    )
    .await?;
    invitations::join_team(&mut tx, user_id, &invitation, role).await?;

    let user = get_profile(&mut *tx, user_id)
        .await?
        .context("Created user is missing")?;
    tx.commit()
        .await
        .context("Failed to commit SQL transaction to sign up a team member.")?;

    let message = match project_id {
        Some(_) => "Account created successfully! You can now login and access the project.",
        None => "Account created successfully! You can now login.",
    };
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            success: true,
            message,
            user,
        }),
    ))
}

#[instrument(name = "Sign up through client invitation", skip(app_state, body), fields(email = %body.email))]
pub(crate) async fn client_signup(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<SignupBody>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    let password_hash = hash_password(body.password.to_secret()).await?;
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let (invitation, kind) = claim_invitation(&mut tx, &body.token, &body.email).await?;
    let InvitationKind::Client { project_id } = kind else {
        return Err(AppError::bad_request("This invitation is not a client invitation"));
    };
    ensure_email_free(&mut tx, &body.email).await?;

    let user_id = insert_user(
        &mut *tx,
        &NewUser {
            name: body.name.as_ref(),
            email: body.email.as_ref(),
            password_hash: password_hash.expose_secret(),
            role: Role::Client,
            account_name: None,
            bring: None,
            teams_member_count: None,
            focus: &[],
            hear_about_as: None,
        },
    )
    .await?;
    invitations::join_as_client(&mut tx, user_id, &invitation, project_id).await?;

    let user = get_profile(&mut *tx, user_id)
        .await?
        .context("Created user is missing")?;
    tx.commit()
        .await
        .context("Failed to commit SQL transaction to sign up a client.")?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            success: true,
            message: "Client account created successfully! You can now login.",
            user,
        }),
    ))
}

async fn ensure_email_free(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &UserEmail,
) -> Result<(), AppError> {
    if email_taken(&mut **tx, email).await? {
        return Err(AppError::bad_request("User already exists with this email"));
    }
    Ok(())
}
