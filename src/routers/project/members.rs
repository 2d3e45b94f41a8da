use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;
use sqlx::PgExecutor;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    authentication::AuthenticatedUser,
    memberships::{can_access_project, project_creator},
    utils::{AppError, MessageResponse},
};

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct ProjectMember {
    project_member_id: Uuid,
    user_id: Uuid,
    name: String,
    email: String,
    role: String,
    legal_role: Option<String>,
    custom_legal_role: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    added_at: OffsetDateTime,
}

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct ProjectClient {
    project_client_id: Uuid,
    user_id: Uuid,
    name: String,
    email: String,
    #[serde(with = "time::serde::rfc3339")]
    added_at: OffsetDateTime,
}

pub(crate) async fn members_of<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
) -> Result<Vec<ProjectMember>, sqlx::Error> {
    sqlx::query_as::<_, ProjectMember>(
        r#"
        SELECT pm.project_member_id, u.user_id, u.name, u.email, pm.role,
               pm.legal_role, pm.custom_legal_role, pm.added_at
        FROM project_members pm
        JOIN users u ON u.user_id = pm.user_id
        WHERE pm.project_id = $1
        ORDER BY pm.added_at
        "#,
    )
    .bind(project_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn clients_of<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
) -> Result<Vec<ProjectClient>, sqlx::Error> {
    sqlx::query_as::<_, ProjectClient>(
        r#"
        SELECT pc.project_client_id, u.user_id, u.name, u.email, pc.added_at
        FROM project_clients pc
        JOIN users u ON u.user_id = pc.user_id
        WHERE pc.project_id = $1
        ORDER BY pc.added_at
        "#,
    )
    .bind(project_id)
    .fetch_all(executor)
    .await
}

#[derive(Serialize)]
pub struct MembersResponse {
    success: bool,
    members: Vec<ProjectMember>,
    clients: Vec<ProjectClient>,
}

#[instrument(name = "List project members", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn list_members(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<MembersResponse>, AppError> {
    if !can_access_project(&app_state.pool, project_id, user.user_id).await? {
        return Err(AppError::not_found("Project not found"));
    }

    Ok(Json(MembersResponse {
        success: true,
        members: members_of(&app_state.pool, project_id).await?,
        clients: clients_of(&app_state.pool, project_id).await?,
    }))
}

/// Drops `member_id` from the project whether they sit on it as a member or a client.
#[instrument(name = "Remove project member", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn remove_member(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((project_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<MessageResponse>, AppError> {
    let creator = project_creator(&app_state.pool, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;
    if creator != user.user_id {
        return Err(AppError::forbidden(
            "Only the project creator can remove members",
        ));
    }
    if member_id == creator {
        return Err(AppError::bad_request(
            "The project creator cannot be removed from the project",
        ));
    }

    let removed: i64 = sqlx::query_scalar(
        r#"
        WITH members AS (
            DELETE FROM project_members
            WHERE project_id = $1 AND user_id = $2
            RETURNING 1
        ), clients AS (
            DELETE FROM project_clients
            WHERE project_id = $1 AND user_id = $2
            RETURNING 1
        )
        SELECT (SELECT COUNT(*) FROM members) + (SELECT COUNT(*) FROM clients)
        "#,
    )
    .bind(project_id)
    .bind(member_id)
    .fetch_one(&app_state.pool)
    .await?;

    if removed == 0 {
        return Err(AppError::not_found("Member not found in this project"));
    }

    Ok(MessageResponse::ok("Member removed from project successfully"))
}
