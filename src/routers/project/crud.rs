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

use super::members::{ProjectClient, ProjectMember, clients_of, members_of};
use crate::{
    app_state::AppState,
    authentication::AuthenticatedUser,
    domain::{Role, TaskPriority},
    memberships::{LegalRole, can_access_project, project_creator, upsert_project_member},
    utils::{AppError, JsonBody, MessageResponse, non_blank},
};

const DEFAULT_PROJECT_STATUS: &str = "OPEN";

pub(crate) const PROJECT_COLUMNS: &str = "p.project_id, p.name, p.description, \
    p.client_name, p.priority, p.status, p.created_by, p.created_at, p.updated_at";

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct Project {
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub priority: String,
    pub status: String,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
pub struct CreateProjectBody {
    name: String,
    description: Option<String>,
    client_name: Option<String>,
    priority: Option<TaskPriority>,
    status: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    success: bool,
    message: &'static str,
    project: Project,
}

#[instrument(name = "Create project", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn create_project(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<CreateProjectBody>,
) -> Result<(StatusCode, Json<ProjectResponse>), AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Project name is required".into()));
    }

    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let project_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO projects (
            project_id, name, description, client_name, priority, status, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(project_id)
    .bind(name)
    .bind(non_blank(body.description))
    .bind(non_blank(body.client_name))
    .bind(body.priority.unwrap_or(TaskPriority::None).as_str())
    .bind(
        non_blank(body.status)
            .unwrap_or_else(|| DEFAULT_PROJECT_STATUS.to_string()),
    )
    .bind(user.user_id)
    .execute(&mut *tx)
    .await?;

    upsert_project_member(
        &mut *tx,
        project_id,
        user.user_id,
        Role::Provider,
        &LegalRole::default(),
    )
    .await?;

    let project = get_project_row(&mut *tx, project_id)
        .await?
        .context("Created project is missing")?;
    tx.commit()
        .await
        .context("Failed to commit SQL transaction to create a project.")?;

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            success: true,
            message: "Project created successfully",
            project,
        }),
    ))
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    success: bool,
    projects: Vec<Project>,
}

#[instrument(name = "List my projects", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn list_projects(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<ProjectsResponse>, AppError> {
    let query = format!(
        r#"
        SELECT {PROJECT_COLUMNS}
        FROM projects p
        WHERE p.created_by = $1
           OR EXISTS (
               SELECT 1 FROM project_members pm
               WHERE pm.project_id = p.project_id AND pm.user_id = $1
           )
           OR EXISTS (
               SELECT 1 FROM project_clients pc
               WHERE pc.project_id = p.project_id AND pc.user_id = $1
           )
        ORDER BY p.created_at DESC
        "#
    );
    let projects = sqlx::query_as::<_, Project>(&query)
        .bind(user.user_id)
        .fetch_all(&app_state.pool)
        .await?;

    Ok(Json(ProjectsResponse {
        success: true,
        projects,
    }))
}

#[derive(Serialize)]
pub struct ProjectDetails {
    #[serde(flatten)]
    project: Project,
    members: Vec<ProjectMember>,
    clients: Vec<ProjectClient>,
}

#[derive(Serialize)]
pub struct ProjectDetailsResponse {
    success: bool,
    project: ProjectDetails,
}

#[instrument(name = "Get project", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn get_project(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectDetailsResponse>, AppError> {
    if !can_access_project(&app_state.pool, project_id, user.user_id).await? {
        return Err(AppError::not_found("Project not found"));
    }

    let project = get_project_row(&app_state.pool, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;
    let members = members_of(&app_state.pool, project_id).await?;
    let clients = clients_of(&app_state.pool, project_id).await?;

    Ok(Json(ProjectDetailsResponse {
        success: true,
        project: ProjectDetails {
            project,
            members,
            clients,
        },
    }))
}

#[derive(Deserialize, Debug)]
pub struct UpdateProjectBody {
    name: Option<String>,
    description: Option<String>,
    client_name: Option<String>,
    priority: Option<TaskPriority>,
    status: Option<String>,
}

#[instrument(name = "Update project", skip(app_state, user, body), fields(user_id = %user.user_id))]
pub(crate) async fn update_project(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
    JsonBody(body): JsonBody<UpdateProjectBody>,
) -> Result<Json<ProjectResponse>, AppError> {
    let name = non_blank(body.name);
    let description = non_blank(body.description);
    let client_name = non_blank(body.client_name);
    let status = non_blank(body.status);
    if name.is_none()
        && description.is_none()
        && client_name.is_none()
        && body.priority.is_none()
        && status.is_none()
    {
        return Err(AppError::bad_request("No fields provided for update"));
    }

    let creator = project_creator(&app_state.pool, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;
    if creator != user.user_id {
        return Err(AppError::forbidden(
            "You are not authorized to update this project",
        ));
    }

    let query = format!(
        r#"
        UPDATE projects p
        SET name = COALESCE($1, name),
            description = COALESCE($2, description),
            client_name = COALESCE($3, client_name),
            priority = COALESCE($4, priority),
            status = COALESCE($5, status),
            updated_at = NOW()
        WHERE p.project_id = $6
        RETURNING {PROJECT_COLUMNS}
        "#
    );
    let project = sqlx::query_as::<_, Project>(&query)
        .bind(name.as_deref().map(str::trim))
        .bind(description)
        .bind(client_name)
        .bind(body.priority.map(|p| p.as_str()))
        .bind(status)
        .bind(project_id)
        .fetch_optional(&app_state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;

    Ok(Json(ProjectResponse {
        success: true,
        message: "Project updated successfully",
        project,
    }))
}

/// Tasks, memberships and invitations of the project go with it.
#[instrument(name = "Delete project", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn delete_project(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let creator = project_creator(&app_state.pool, project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;
    if creator != user.user_id {
        return Err(AppError::forbidden(
            "Only the project creator can delete this project",
        ));
    }

    sqlx::query("DELETE FROM projects WHERE project_id = $1")
        .bind(project_id)
        .execute(&app_state.pool)
        .await?;

    Ok(MessageResponse::ok("Project deleted successfully"))
}

async fn get_project_row<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    let query = format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.project_id = $1");
    sqlx::query_as::<_, Project>(&query)
        .bind(project_id)
        .fetch_optional(executor)
        .await
}
