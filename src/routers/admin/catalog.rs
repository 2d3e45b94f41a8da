use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use super::overview::DataResponse;
use crate::{
    app_state::AppState,
    domain::TaskStatus,
    utils::{AppError, PageQuery, Pagination, ilike_pattern},
};

const DEFAULT_CATALOG_PAGE_SIZE: i64 = 50;

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct ProjectRow {
    project_id: Uuid,
    name: String,
    description: Option<String>,
    client_name: Option<String>,
    priority: String,
    status: String,
    created_by: Uuid,
    creator_name: String,
    creator_email: String,
    member_count: i64,
    task_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
pub struct ProjectsQuery {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
}

#[derive(Serialize)]
pub struct ProjectsPage {
    projects: Vec<ProjectRow>,
    pagination: Pagination,
}

const PROJECT_FILTER: &str = r#"
    WHERE $1::TEXT IS NULL
       OR p.name ILIKE $1
       OR p.client_name ILIKE $1
       OR p.description ILIKE $1
"#;

#[instrument(name = "Admin list projects", skip(app_state))]
pub(crate) async fn list_projects(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ProjectsQuery>,
) -> Result<Json<DataResponse<ProjectsPage>>, AppError> {
    let search = ilike_pattern(query.search);
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .window(DEFAULT_CATALOG_PAGE_SIZE);

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM projects p {PROJECT_FILTER}"
    ))
    .bind(search.as_deref())
    .fetch_one(&app_state.pool)
    .await?;
    let pagination = Pagination::new(page, limit, total);

    let sql = format!(
        r#"
        SELECT p.project_id, p.name, p.description, p.client_name, p.priority,
               p.status, p.created_by, u.name AS creator_name,
               u.email AS creator_email,
               (SELECT COUNT(*) FROM project_members pm
                WHERE pm.project_id = p.project_id) AS member_count,
               (SELECT COUNT(*) FROM tasks t
                WHERE t.project_id = p.project_id) AS task_count,
               p.created_at
        FROM projects p
        JOIN users u ON u.user_id = p.created_by
        {PROJECT_FILTER}
        ORDER BY p.created_at DESC
        LIMIT $2 OFFSET $3
        "#
    );
    let projects = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(search.as_deref())
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&app_state.pool)
        .await?;

    Ok(DataResponse::ok(ProjectsPage {
        projects,
        pagination,
    }))
}

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct TaskRow {
    task_id: Uuid,
    name: String,
    description: Option<String>,
    priority: String,
    status: String,
    project_id: Uuid,
    project_name: String,
    created_by: Uuid,
    creator_name: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
pub struct TasksQuery {
    page: Option<i64>,
    limit: Option<i64>,
    status: Option<String>,
    project_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct TasksPage {
    tasks: Vec<TaskRow>,
    pagination: Pagination,
}

const TASK_FILTER: &str = r#"
    WHERE ($1::TEXT IS NULL OR t.status = $1)
      AND ($2::UUID IS NULL OR t.project_id = $2)
"#;

#[instrument(name = "Admin list tasks", skip(app_state))]
pub(crate) async fn list_tasks(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<DataResponse<TasksPage>>, AppError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("ALL") => None,
        Some(status) => Some(
            status
                .parse::<TaskStatus>()
                .map_err(AppError::bad_request)?
                .as_str(),
        ),
    };
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .window(DEFAULT_CATALOG_PAGE_SIZE);

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM tasks t {TASK_FILTER}"))
            .bind(status)
            .bind(query.project_id)
            .fetch_one(&app_state.pool)
            .await?;
    let pagination = Pagination::new(page, limit, total);

    let sql = format!(
        r#"
        SELECT t.task_id, t.name, t.description, t.priority, t.status,
               t.project_id, p.name AS project_name, t.created_by,
               u.name AS creator_name, t.created_at
        FROM tasks t
        JOIN projects p ON p.project_id = t.project_id
        JOIN users u ON u.user_id = t.created_by
        {TASK_FILTER}
        ORDER BY t.created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let tasks = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(status)
        .bind(query.project_id)
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&app_state.pool)
        .await?;

    Ok(DataResponse::ok(TasksPage { tasks, pagination }))
}
