//! Storage and acceptance of team and client invitations.
//!
//! Every acceptance path takes the caller's transaction so that the team
//! link, project rows, role change and invitation deletion commit together.

use serde::Serialize;
use sqlx::{PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::accounts::set_role;
use crate::app_state::AppState;
use crate::authentication::AuthenticatedUser;
use crate::domain::{
    InvitationKind, InvitationToken, NewInvitation, Role, TeamRole, UserEmail,
    invitation_admits, invitation_is_live,
};
use crate::memberships::{
    LegalRole, insert_project_client, insert_team_link, team_link_exists,
    upsert_project_member, upsert_team_link,
};
use crate::notifications;
use crate::utils::AppError;

pub const INVALID_INVITATION: &str = "Invalid or expired invitation link";

const INVITATION_COLUMNS: &str = "invitation_id, role, leader_id, project_id, \
    legal_role, custom_legal_role, invited_email, expires_at";

#[derive(Debug, sqlx::FromRow)]
pub struct StoredInvitation {
    pub invitation_id: Uuid,
    pub role: String,
    pub leader_id: Uuid,
    pub project_id: Option<Uuid>,
    pub legal_role: Option<String>,
    pub custom_legal_role: Option<String>,
    pub invited_email: Option<String>,
    pub expires_at: OffsetDateTime,
}

impl StoredInvitation {
    pub fn kind(&self) -> Result<InvitationKind, anyhow::Error> {
        let role = self.role.parse::<Role>().map_err(|e| anyhow::anyhow!(e))?;
        InvitationKind::new(role, self.project_id)
            .map_err(|e| anyhow::anyhow!("Stored invitation is malformed: {e}"))
    }

    pub fn legal(&self) -> LegalRole {
        LegalRole {
            legal_role: self.legal_role.clone(),
            custom_legal_role: self.custom_legal_role.clone(),
        }
    }
}

#[instrument(
    name = "Store invitation",
    skip(executor, invitation),
    fields(leader_id = %invitation.leader_id, role = %invitation.kind.role())
)]
pub async fn store_invitation<'c>(
    executor: impl PgExecutor<'c>,
    invitation: &NewInvitation,
) -> Result<Uuid, sqlx::Error> {
    let invitation_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO invitations (
            invitation_id, token_hash, role, leader_id, project_id, legal_role,
            custom_legal_role, invited_email, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(invitation_id)
    .bind(invitation.token.hash())
    .bind(invitation.kind.role().as_str())
    .bind(invitation.leader_id)
    .bind(invitation.kind.project_id())
    .bind(invitation.legal_role.as_deref())
    .bind(invitation.custom_legal_role.as_deref())
    .bind(invitation.invited_email.as_ref().map(|e| e.as_ref()))
    .bind(invitation.expires_at)
    .execute(executor)
    .await?;

    Ok(invitation_id)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationLinkResponse {
    pub success: bool,
    pub message: &'static str,
    pub link: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Stores the invitation and mails its link to the invitee when one is named.
pub async fn issue_invitation(
    app_state: &AppState,
    leader: &AuthenticatedUser,
    invitation: NewInvitation,
    message: &'static str,
) -> Result<InvitationLinkResponse, AppError> {
    store_invitation(&app_state.pool, &invitation).await?;

    let link = app_state.link(&invitation.kind.link_path(&invitation.token));
    if let Some(invitee) = &invitation.invited_email {
        notifications::send_best_effort(
            &app_state.email_client,
            invitee,
            notifications::team_invitation(
                &leader.name,
                invitation.kind.role(),
                &link,
            ),
        )
        .await;
    }

    Ok(InvitationLinkResponse {
        success: true,
        message,
        link,
        expires_at: invitation.expires_at,
    })
}

/// Locks the invitation behind `token` and checks it may be used by `email`.
#[instrument(name = "Claim invitation", skip(tx, token))]
pub async fn claim_invitation(
    tx: &mut Transaction<'_, Postgres>,
    token: &InvitationToken,
    email: &UserEmail,
) -> Result<(StoredInvitation, InvitationKind), AppError> {
    let query = format!(
        "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token_hash = $1 FOR UPDATE"
    );
    let invitation = sqlx::query_as::<_, StoredInvitation>(&query)
        .bind(token.hash())
        .fetch_optional(&mut **tx)
        .await?
        .filter(|i| invitation_is_live(i.expires_at, OffsetDateTime::now_utc()))
        .ok_or_else(|| AppError::bad_request(INVALID_INVITATION))?;

    if !invitation_admits(invitation.invited_email.as_deref(), email) {
        return Err(AppError::forbidden(
            "This invitation was issued for a different email address",
        ));
    }

    let kind = invitation.kind()?;
    Ok((invitation, kind))
}

async fn delete_invitation(
    tx: &mut Transaction<'_, Postgres>,
    invitation_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM invitations WHERE invitation_id = $1")
        .bind(invitation_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Adds `user_id` to the leader's team with the invited role.
///
/// Fails with 400 when the user already is in that team.
#[instrument(name = "Join team through invitation", skip(tx, invitation))]
pub async fn join_team(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    invitation: &StoredInvitation,
    role: TeamRole,
) -> Result<(), AppError> {
    if team_link_exists(&mut **tx, user_id, invitation.leader_id).await? {
        return Err(AppError::bad_request("You are already a member of this team"));
    }

    let legal = invitation.legal();
    insert_team_link(&mut **tx, user_id, invitation.leader_id, role.into(), &legal)
        .await?;
    if let Some(project_id) = invitation.project_id {
        upsert_project_member(&mut **tx, project_id, user_id, role.into(), &legal)
            .await?;
    }
    set_role(&mut **tx, user_id, role.into()).await?;
    delete_invitation(tx, invitation.invitation_id).await?;

    Ok(())
}

/// Makes `user_id` a client of the invitation's project.
///
/// Fails with 400 when the user already is a client of it.
#[instrument(name = "Join project as client", skip(tx, invitation))]
pub async fn join_as_client(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    invitation: &StoredInvitation,
    project_id: Uuid,
) -> Result<(), AppError> {
    if !insert_project_client(&mut **tx, project_id, user_id).await? {
        return Err(AppError::bad_request(
            "You are already a client of this project",
        ));
    }
    set_role(&mut **tx, user_id, Role::Client).await?;
    delete_invitation(tx, invitation.invitation_id).await?;

    Ok(())
}

/// Accepts a project invitation of either kind. Unlike [`join_team`] an
/// existing team link is refreshed rather than rejected.
#[instrument(name = "Join project through invitation", skip(tx, invitation))]
pub async fn join_project(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    invitation: &StoredInvitation,
    kind: InvitationKind,
) -> Result<(), AppError> {
    match kind {
        InvitationKind::Team { role, project_id } => {
            apply_team_kind(tx, user_id, invitation, role, project_id).await?;
            delete_invitation(tx, invitation.invitation_id).await?;
            Ok(())
        }
        InvitationKind::Client { project_id } => {
            join_as_client(tx, user_id, invitation, project_id).await
        }
    }
}

async fn apply_team_kind(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    invitation: &StoredInvitation,
    role: TeamRole,
    project_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    let legal = invitation.legal();
    upsert_team_link(&mut **tx, user_id, invitation.leader_id, role.into(), &legal)
        .await?;
    if let Some(project_id) = project_id {
        upsert_project_member(&mut **tx, project_id, user_id, role.into(), &legal)
            .await?;
    }
    set_role(&mut **tx, user_id, role.into()).await?;
    Ok(())
}

/// Applies the most recent live invitation addressed to `email`, if any.
#[instrument(name = "Apply pending invitation", skip(tx))]
pub async fn apply_pending_invitation(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    email: &UserEmail,
) -> Result<Option<Role>, anyhow::Error> {
    let query = format!(
        r#"
        SELECT {INVITATION_COLUMNS}
        FROM invitations
        WHERE LOWER(invited_email) = $1 AND expires_at >= NOW()
        ORDER BY expires_at DESC
        LIMIT 1
        FOR UPDATE
        "#
    );
    let Some(invitation) = sqlx::query_as::<_, StoredInvitation>(&query)
        .bind(email.as_ref())
        .fetch_optional(&mut **tx)
        .await?
    else {
        return Ok(None);
    };

    let kind = invitation.kind()?;
    match kind {
        InvitationKind::Team { role, project_id } => {
            apply_team_kind(tx, user_id, &invitation, role, project_id).await?;
        }
        InvitationKind::Client { project_id } => {
            insert_project_client(&mut **tx, project_id, user_id).await?;
            set_role(&mut **tx, user_id, Role::Client).await?;
        }
    }
    delete_invitation(tx, invitation.invitation_id).await?;

    tracing::info!(role = %kind.role(), "Applied a pending invitation");
    Ok(Some(kind.role()))
}
