use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    authentication::{AuthenticatedUser, reject_anonymous_users},
    domain::{Role, TaskPriority, TaskStatus},
    memberships::{can_access_project, project_creator},
    utils::{AppError, JsonBody, MessageResponse, non_blank},
};

pub fn router(app_state: Arc<AppState>) -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/", post(create_task))
        .route("/project/{project_id}", get(list_project_tasks))
        .route(
            "/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route_layer(from_fn_with_state(app_state, reject_anonymous_users))
}

const TASK_COLUMNS: &str = "task_id, project_id, name, description, priority, \
    status, created_by, created_at, updated_at";

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct Task {
    task_id: Uuid,
    project_id: Uuid,
    name: String,
    description: Option<String>,
    priority: String,
    status: String,
    created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

#[derive(Serialize)]
pub struct TaskResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    task: Task,
}

#[derive(Deserialize, Debug)]
pub struct CreateTaskBody {
    project_id: Uuid,
    name: String,
    description: Option<String>,
    priority: TaskPriority,
    status: TaskStatus,
}

/// Only PROVIDER members of the project may add tasks to it.
#[instrument(name = "Create task", skip(app_state, user, body), fields(user_id = %user.user_id, project_id = %body.project_id))]
async fn create_task(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<CreateTaskBody>,
) -> Result<(StatusCode, Json<TaskResponse>), AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Task name is required".into()));
    }

    project_creator(&app_state.pool, body.project_id)
        .await?
        .ok_or_else(|| AppError::not_found("Project not found"))?;

    let member_role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM project_members WHERE project_id = $1 AND user_id = $2",
    )
    .bind(body.project_id)
    .bind(user.user_id)
    .fetch_optional(&app_state.pool)
    .await?;
    if member_role.as_deref() != Some(Role::Provider.as_str()) {
        return Err(AppError::forbidden(
            "Only project providers can create tasks",
        ));
    }

    let query = format!(
        r#"
        INSERT INTO tasks (task_id, project_id, name, description, priority, status, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {TASK_COLUMNS}
        "#
    );
    let task = sqlx::query_as::<_, Task>(&query)
        .bind(Uuid::new_v4())
        .bind(body.project_id)
        .bind(name)
        .bind(non_blank(body.description))
        .bind(body.priority.as_str())
        .bind(body.status.as_str())
        .bind(user.user_id)
        .fetch_one(&app_state.pool)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TaskResponse {
            success: true,
            message: Some("Task created successfully"),
            task,
        }),
    ))
}

#[derive(Serialize)]
pub struct TasksResponse {
    success: bool,
    tasks: Vec<Task>,
}

#[instrument(name = "List project tasks", skip(app_state, user), fields(user_id = %user.user_id))]
async fn list_project_tasks(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<TasksResponse>, AppError> {
    if !can_access_project(&app_state.pool, project_id, user.user_id).await? {
        return Err(AppError::forbidden("Access denied to this project"));
    }

    let query = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = $1 ORDER BY created_at DESC"
    );
    let tasks = sqlx::query_as::<_, Task>(&query)
        .bind(project_id)
        .fetch_all(&app_state.pool)
        .await?;

    Ok(Json(TasksResponse {
        success: true,
        tasks,
    }))
}

#[instrument(name = "Get task", skip(app_state, user), fields(user_id = %user.user_id))]
async fn get_task(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = find_task(&app_state.pool, task_id)
        .await?
        .ok_or_else(task_not_found)?;
    if !can_access_project(&app_state.pool, task.project_id, user.user_id).await? {
        return Err(task_not_found());
    }

    Ok(Json(TaskResponse {
        success: true,
        message: None,
        task,
    }))
}

#[derive(Deserialize, Debug)]
pub struct UpdateTaskBody {
    name: Option<String>,
    description: Option<String>,
    priority: Option<TaskPriority>,
    status: Option<TaskStatus>,
}

#[instrument(name = "Update task", skip(app_state, user, body), fields(user_id = %user.user_id))]
async fn update_task(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
    JsonBody(body): JsonBody<UpdateTaskBody>,
) -> Result<Json<TaskResponse>, AppError> {
    let name = non_blank(body.name);
    let description = non_blank(body.description);
    if name.is_none()
        && description.is_none()
        && body.priority.is_none()
        && body.status.is_none()
    {
        return Err(AppError::bad_request("No fields provided for update"));
    }

    let task = find_task(&app_state.pool, task_id)
        .await?
        .ok_or_else(task_not_found)?;
    ensure_may_manage(&app_state.pool, &task, &user).await?;

    let query = format!(
        r#"
        UPDATE tasks
        SET name = COALESCE($1, name),
            description = COALESCE($2, description),
            priority = COALESCE($3, priority),
            status = COALESCE($4, status),
            updated_at = NOW()
        WHERE task_id = $5
        RETURNING {TASK_COLUMNS}
        "#
    );
    let task = sqlx::query_as::<_, Task>(&query)
        .bind(name.as_deref().map(str::trim))
        .bind(description)
        .bind(body.priority.map(|p| p.as_str()))
        .bind(body.status.map(|s| s.as_str()))
        .bind(task_id)
        .fetch_one(&app_state.pool)
        .await?;

    Ok(Json(TaskResponse {
        success: true,
        message: Some("Task updated successfully"),
        task,
    }))
}

#[instrument(name = "Delete task", skip(app_state, user), fields(user_id = %user.user_id))]
async fn delete_task(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let task = find_task(&app_state.pool, task_id)
        .await?
        .ok_or_else(task_not_found)?;
    ensure_may_manage(&app_state.pool, &task, &user).await?;

    sqlx::query("DELETE FROM tasks WHERE task_id = $1")
        .bind(task_id)
        .execute(&app_state.pool)
        .await?;

    Ok(MessageResponse::ok("Task deleted successfully"))
}

/// The task's author and the creator of its project may change it.
async fn ensure_may_manage<'c>(
    executor: impl PgExecutor<'c>,
    task: &Task,
    user: &AuthenticatedUser,
) -> Result<(), AppError> {
    if task.created_by == user.user_id {
        return Ok(());
    }
    match project_creator(executor, task.project_id).await? {
        Some(creator) if creator == user.user_id => Ok(()),
        _ => Err(AppError::forbidden(
            "Only the task creator or the project creator can modify this task",
        )),
    }
}

async fn find_task<'c>(
    executor: impl PgExecutor<'c>,
    task_id: Uuid,
) -> Result<Option<Task>, sqlx::Error> {
    let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1");
    sqlx::query_as::<_, Task>(&query)
        .bind(task_id)
        .fetch_optional(executor)
        .await
}

fn task_not_found() -> AppError {
    AppError::not_found("Task not found")
}
