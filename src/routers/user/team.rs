use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    accounts::{find_profile_by_email, set_role},
    app_state::AppState,
    authentication::AuthenticatedUser,
    domain::{Role, TeamRole, UserEmail},
    memberships::{LegalRole, insert_team_link, team_link_exists},
    utils::{AppError, JsonBody, non_blank},
};

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct TeamMember {
    team_member_id: Uuid,
    user_id: Uuid,
    name: String,
    email: String,
    user_role: String,
    role: String,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

const TEAM_MEMBER_QUERY: &str = r#"
    SELECT ut.team_member_id, u.user_id, u.name, u.email, u.role AS user_role,
           ut.role, ut.legal_role, ut.custom_legal_role, ut.created_at
    FROM user_teams ut
    JOIN users u ON u.user_id = ut.user_id
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMembersResponse {
    success: bool,
    team_members: Vec<TeamMember>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberResponse {
    success: bool,
    message: &'static str,
    team_member: TeamMember,
}

#[instrument(name = "List team members", skip(app_state, user), fields(leader_id = %user.user_id))]
pub(crate) async fn list_team_members(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<TeamMembersResponse>, AppError> {
    let query = format!("{TEAM_MEMBER_QUERY} WHERE ut.leader_id = $1 ORDER BY ut.created_at");
    let team_members = sqlx::query_as::<_, TeamMember>(&query)
        .bind(user.user_id)
        .fetch_all(&app_state.pool)
        .await?;

    Ok(Json(TeamMembersResponse {
        success: true,
        team_members,
    }))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTeamMemberBody {
    role: TeamRole,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
}

#[instrument(name = "Update team member", skip(app_state, user), fields(leader_id = %user.user_id))]
pub(crate) async fn update_team_member(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team_member_id): Path<Uuid>,
    JsonBody(body): JsonBody<UpdateTeamMemberBody>,
) -> Result<Json<TeamMemberResponse>, AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE user_teams
        SET role = $1, legal_role = $2, custom_legal_role = $3
        WHERE team_member_id = $4 AND leader_id = $5
        "#,
    )
    .bind(Role::from(body.role).as_str())
    .bind(non_blank(body.legal_role))
    .bind(non_blank(body.custom_legal_role))
    .bind(team_member_id)
    .bind(user.user_id)
    .execute(&app_state.pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(team_member_not_found());
    }

    let team_member = get_team_member(&app_state.pool, team_member_id)
        .await?
        .ok_or_else(team_member_not_found)?;

    Ok(Json(TeamMemberResponse {
        success: true,
        message: "Team member updated successfully",
        team_member,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTeamMemberResponse {
    success: bool,
    message: String,
    removed_project_memberships: u64,
}

/// Removes the team link and the member's seats on the leader's projects.
#[instrument(name = "Remove team member", skip(app_state, user), fields(leader_id = %user.user_id))]
pub(crate) async fn remove_team_member(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team_member_id): Path<Uuid>,
) -> Result<Json<RemoveTeamMemberResponse>, AppError> {
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let member_id: Uuid = sqlx::query_scalar(
        r#"
        DELETE FROM user_teams
        WHERE team_member_id = $1 AND leader_id = $2
        RETURNING user_id
        "#,
    )
    .bind(team_member_id)
    .bind(user.user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(team_member_not_found)?;

    let removed = sqlx::query(
        r#"
        DELETE FROM project_members pm
        USING projects p
        WHERE pm.project_id = p.project_id
          AND p.created_by = $1
          AND pm.user_id = $2
        "#,
    )
    .bind(user.user_id)
    .bind(member_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to remove a team member.")?;

    Ok(Json(RemoveTeamMemberResponse {
        success: true,
        message: format!(
            "Team member removed successfully. They were also removed from \
            {removed} project(s)."
        ),
        removed_project_memberships: removed,
    }))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InviteTeamMemberBody {
    email: UserEmail,
    role: TeamRole,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
}

/// Adds an existing user to the caller's team without an invitation link.
#[instrument(
    name = "Add team member directly",
    skip(app_state, user, body),
    fields(leader_id = %user.user_id, email = %body.email)
)]
pub(crate) async fn invite_team_member(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<InviteTeamMemberBody>,
) -> Result<(StatusCode, Json<TeamMemberResponse>), AppError> {
    let member = find_profile_by_email(&app_state.pool, &body.email)
        .await?
        .ok_or_else(|| AppError::not_found("User with this email does not exist"))?;

    if member.user_id == user.user_id {
        return Err(AppError::bad_request("You cannot add yourself to your team"));
    }

    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    if team_link_exists(&mut *tx, member.user_id, user.user_id).await? {
        return Err(AppError::bad_request("User is already in your team"));
    }

    let legal = LegalRole {
        legal_role: non_blank(body.legal_role),
        custom_legal_role: non_blank(body.custom_legal_role),
    };
    let team_member_id = insert_team_link(
        &mut *tx,
        member.user_id,
        user.user_id,
        body.role.into(),
        &legal,
    )
    .await?;

    let current_role = member.role()?;
    let promoted = current_role.after_direct_team_add(body.role);
    if promoted != current_role {
        set_role(&mut *tx, member.user_id, promoted).await?;
        tracing::info!(from = %current_role, to = %promoted, "Promoted team member");
    }

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to add a team member.")?;

    let team_member = get_team_member(&app_state.pool, team_member_id)
        .await?
        .ok_or_else(team_member_not_found)?;

    Ok((
        StatusCode::CREATED,
        Json(TeamMemberResponse {
            success: true,
            message: "Team member added successfully",
            team_member,
        }),
    ))
}

async fn get_team_member<'c>(
    executor: impl PgExecutor<'c>,
    team_member_id: Uuid,
) -> Result<Option<TeamMember>, sqlx::Error> {
    let query = format!("{TEAM_MEMBER_QUERY} WHERE ut.team_member_id = $1");
    sqlx::query_as::<_, TeamMember>(&query)
        .bind(team_member_id)
        .fetch_optional(executor)
        .await
}

fn team_member_not_found() -> AppError {
    AppError::not_found(
        "Team member not found or you are not authorized to manage this member",
    )
}
