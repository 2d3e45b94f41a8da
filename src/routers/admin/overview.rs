use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{app_state::AppState, utils::AppError};

const RECENT_ITEMS: i64 = 5;
const DEFAULT_ANALYTICS_DAYS: i64 = 30;
const MAX_ANALYTICS_DAYS: i64 = 365;

#[derive(Serialize)]
pub struct DataResponse<T> {
    success: bool,
    data: T,
}

impl<T> DataResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize, sqlx::FromRow, Debug, PartialEq, Eq)]
pub struct RequestStats {
    pending: i64,
    approved: i64,
    rejected: i64,
    total: i64,
}

#[derive(Serialize)]
pub struct DashboardStats {
    stats: RequestStats,
}

#[instrument(name = "Admin dashboard stats", skip(app_state))]
pub(crate) async fn dashboard_stats(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<DataResponse<DashboardStats>>, AppError> {
    let stats = sqlx::query_as::<_, RequestStats>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
            COUNT(*) FILTER (WHERE status = 'APPROVED') AS approved,
            COUNT(*) FILTER (WHERE status = 'REJECTED') AS rejected,
            COUNT(*) AS total
        FROM registration_requests
        "#,
    )
    .fetch_one(&app_state.pool)
    .await?;

    Ok(DataResponse::ok(DashboardStats { stats }))
}

#[derive(Serialize, sqlx::FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    total_users: i64,
    total_projects: i64,
    total_tasks: i64,
    pending_tasks: i64,
    completed_tasks: i64,
    pending_requests: i64,
}

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct RoleCount {
    role: String,
    count: i64,
}

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct RecentUser {
    user_id: Uuid,
    name: String,
    email: String,
    role: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct RecentProject {
    project_id: Uuid,
    name: String,
    status: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemOverview {
    overview: Overview,
    users_by_role: Vec<RoleCount>,
    recent_users: Vec<RecentUser>,
    recent_projects: Vec<RecentProject>,
}

#[instrument(name = "Admin system overview", skip(app_state))]
pub(crate) async fn system_overview(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<DataResponse<SystemOverview>>, AppError> {
    let overview = sqlx::query_as::<_, Overview>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM users) AS total_users,
            (SELECT COUNT(*) FROM projects) AS total_projects,
            (SELECT COUNT(*) FROM tasks) AS total_tasks,
            (SELECT COUNT(*) FROM tasks
             WHERE status IN ('TO_DO', 'IN_PROGRESS')) AS pending_tasks,
            (SELECT COUNT(*) FROM tasks WHERE status = 'DONE') AS completed_tasks,
            (SELECT COUNT(*) FROM registration_requests
             WHERE status = 'PENDING') AS pending_requests
        "#,
    )
    .fetch_one(&app_state.pool)
    .await?;

    let users_by_role = sqlx::query_as::<_, RoleCount>(
        "SELECT role, COUNT(*) AS count FROM users GROUP BY role ORDER BY role",
    )
    .fetch_all(&app_state.pool)
    .await?;

    let recent_users = sqlx::query_as::<_, RecentUser>(
        r#"
        SELECT user_id, name, email, role, created_at
        FROM users
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(RECENT_ITEMS)
    .fetch_all(&app_state.pool)
    .await?;

    let recent_projects = sqlx::query_as::<_, RecentProject>(
        r#"
        SELECT project_id, name, status, created_at
        FROM projects
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(RECENT_ITEMS)
    .fetch_all(&app_state.pool)
    .await?;

    Ok(DataResponse::ok(SystemOverview {
        overview,
        users_by_role,
        recent_users,
        recent_projects,
    }))
}

#[derive(Deserialize, Debug)]
pub struct AnalyticsQuery {
    period: Option<i64>,
}

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct Bucket {
    key: String,
    count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    period_days: i64,
    user_growth: Vec<Bucket>,
    project_growth: Vec<Bucket>,
    role_distribution: Vec<Bucket>,
    project_status_distribution: Vec<Bucket>,
    task_status_distribution: Vec<Bucket>,
}

/// Daily sign ups and project creations over the last `period` days plus the
/// current role and status distributions.
#[instrument(name = "Admin analytics", skip(app_state))]
pub(crate) async fn analytics(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<DataResponse<Analytics>>, AppError> {
    let period_days = query
        .period
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_ANALYTICS_DAYS)
        .min(MAX_ANALYTICS_DAYS);
    let since = OffsetDateTime::now_utc() - time::Duration::days(period_days);

    let growth = |table: &str| {
        format!(
            r#"
            SELECT TO_CHAR(DATE_TRUNC('day', created_at), 'YYYY-MM-DD') AS key,
                   COUNT(*) AS count
            FROM {table}
            WHERE created_at >= $1
            GROUP BY 1
            ORDER BY 1
            "#
        )
    };
    let distribution = |table: &str, column: &str| {
        format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM {table} \
            GROUP BY {column} ORDER BY {column}"
        )
    };

    let user_growth = sqlx::query_as::<_, Bucket>(&growth("users"))
        .bind(since)
        .fetch_all(&app_state.pool)
        .await?;
    let project_growth = sqlx::query_as::<_, Bucket>(&growth("projects"))
        .bind(since)
        .fetch_all(&app_state.pool)
        .await?;
    let role_distribution =
        sqlx::query_as::<_, Bucket>(&distribution("users", "role"))
            .fetch_all(&app_state.pool)
            .await?;
    let project_status_distribution =
        sqlx::query_as::<_, Bucket>(&distribution("projects", "status"))
            .fetch_all(&app_state.pool)
            .await?;
    let task_status_distribution =
        sqlx::query_as::<_, Bucket>(&distribution("tasks", "status"))
            .fetch_all(&app_state.pool)
            .await?;

    Ok(DataResponse::ok(Analytics {
        period_days,
        user_growth,
        project_growth,
        role_distribution,
        project_status_distribution,
        task_status_distribution,
    }))
}
