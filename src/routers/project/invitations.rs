use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    accounts::{find_profile_by_email, send_login_otp_best_effort},
    app_state::AppState,
    authentication::AuthenticatedUser,
    domain::{InvitationKind, InvitationToken, NewInvitation, Role, UserEmail},
    invitations::{self, InvitationLinkResponse, claim_invitation, issue_invitation},
    memberships::project_creator,
    utils::{AppError, JsonBody, MessageResponse, non_blank},
};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInvitationBody {
    role: Role,
    #[serde(alias = "project_id")]
    project_id: Option<Uuid>,
    #[serde(rename = "invited_email", alias = "invitedEmail")]
    invited_email: Option<UserEmail>,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
}

#[instrument(
    name = "Invite to project",
    skip(app_state, user),
    fields(leader_id = %user.user_id)
)]
pub(crate) async fn invite_to_project(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<ProjectInvitationBody>,
) -> Result<(StatusCode, Json<InvitationLinkResponse>), AppError> {
    let kind = InvitationKind::new(body.role, body.project_id)
        .map_err(AppError::bad_request)?;

    if let Some(project_id) = kind.project_id() {
        let creator = project_creator(&app_state.pool, project_id)
            .await?
            .ok_or_else(|| AppError::not_found("Project not found"))?;
        if creator != user.user_id {
            return Err(AppError::forbidden(
                "Only the project creator can invite to this project",
            ));
        }
    }

    let invitation = NewInvitation {
        token: InvitationToken::generate(),
        kind,
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
        "Invitation link generated successfully",
    )
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize, Debug)]
pub struct JoinProjectBody {
    token: InvitationToken,
}

#[instrument(name = "Join project", skip(app_state, user, body), fields(user_id = %user.user_id))]
pub(crate) async fn join_project(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<JoinProjectBody>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let email: UserEmail = user
        .email
        .parse()
        .map_err(|e| anyhow::anyhow!("Stored email is invalid: {e}"))?;

    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let (invitation, kind) = claim_invitation(&mut tx, &body.token, &email).await?;
    invitations::join_project(&mut tx, user.user_id, &invitation, kind).await?;

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to join a project.")?;

    Ok((StatusCode::CREATED, MessageResponse::ok(joined_message(kind))))
}

fn joined_message(kind: InvitationKind) -> &'static str {
    match kind {
        InvitationKind::Client { .. } => "Successfully joined the project as a client",
        InvitationKind::Team { project_id: Some(_), .. } => {
            "Successfully joined the team and the project"
        }
        InvitationKind::Team { project_id: None, .. } => "Successfully joined the team",
    }
}

#[derive(Deserialize, Debug)]
pub struct JoinProjectWithInvitationBody {
    token: InvitationToken,
    email: UserEmail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingInvitation {
    token: String,
    role: Role,
    #[serde(rename = "project_id")]
    project_id: Option<Uuid>,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequired {
    success: bool,
    message: &'static str,
    requires_registration: bool,
    invitation: PendingInvitation,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinedWithInvitation {
    success: bool,
    message: &'static str,
    requires_verification: bool,
}

/// Accepts a project invitation for a user who is not signed in.
///
/// An unknown email gets 404 with the invitation details so the invitee can
/// register first; the invitation is left untouched.
#[instrument(
    name = "Join project with invitation",
    skip(app_state, body),
    fields(email = %body.email)
)]
pub(crate) async fn join_project_with_invitation(
    State(app_state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<JoinProjectWithInvitationBody>,
) -> Result<Response, AppError> {
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let (invitation, kind) = claim_invitation(&mut tx, &body.token, &body.email).await?;

    let Some(user) = find_profile_by_email(&mut *tx, &body.email).await? else {
        tracing::info!("Invitee has no account yet");
        return Ok((
            StatusCode::NOT_FOUND,
            Json(RegistrationRequired {
                success: false,
                message: "User not found with this email. Please register first.",
                requires_registration: true,
                invitation: PendingInvitation {
                    token: body.token.as_ref().to_string(),
                    role: kind.role(),
                    project_id: kind.project_id(),
                    legal_role: invitation.legal_role,
                    custom_legal_role: invitation.custom_legal_role,
                },
            }),
        )
            .into_response());
    };

    invitations::join_project(&mut tx, user.user_id, &invitation, kind).await?;
    tx.commit()
        .await
        .context("Failed to commit SQL transaction to join a project.")?;

    send_login_otp_best_effort(&app_state, &user).await;

    Ok((
        StatusCode::CREATED,
        Json(JoinedWithInvitation {
            success: true,
            message: joined_message(kind),
            requires_verification: true,
        }),
    )
        .into_response())
}
