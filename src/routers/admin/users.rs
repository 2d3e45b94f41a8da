use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use super::overview::DataResponse;
use crate::{
    accounts::{NewUser, UserProfile, email_taken, get_profile, insert_user, set_role},
    app_state::AppState,
    authentication::{AuthenticatedUser, hash_password},
    domain::{Password, Role, UserEmail, UserName},
    utils::{
        AppError, JsonBody, MessageResponse, PageQuery, Pagination, ilike_pattern,
        non_blank,
    },
};

const DEFAULT_USER_PAGE_SIZE: i64 = 50;

#[derive(Serialize, sqlx::FromRow, Debug)]
pub struct UserSummary {
    user_id: Uuid,
    name: String,
    email: String,
    role: String,
    account_name: Option<String>,
    active_status: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
pub struct UsersQuery {
    page: Option<i64>,
    limit: Option<i64>,
    role: Option<String>,
    search: Option<String>,
}

impl UsersQuery {
    fn role_filter(&self) -> Result<Option<Role>, AppError> {
        match self.role.as_deref().map(str::trim) {
            None | Some("") | Some("ALL") => Ok(None),
            Some(role) => role.parse::<Role>().map(Some).map_err(AppError::bad_request),
        }
    }
}

#[derive(Serialize)]
pub struct UsersPage {
    users: Vec<UserSummary>,
    pagination: Pagination,
}

const USER_FILTER: &str = r#"
    WHERE ($1::TEXT IS NULL OR role = $1)
      AND ($2::TEXT IS NULL
           OR name ILIKE $2
           OR email ILIKE $2
           OR account_name ILIKE $2)
"#;

#[instrument(name = "Admin list users", skip(app_state))]
pub(crate) async fn list_users(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<DataResponse<UsersPage>>, AppError> {
    let role = query.role_filter()?.map(|r| r.as_str());
    let search = ilike_pattern(query.search.clone());
    let (page, limit) = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .window(DEFAULT_USER_PAGE_SIZE);

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users {USER_FILTER}"))
            .bind(role)
            .bind(search.as_deref())
            .fetch_one(&app_state.pool)
            .await?;
    let pagination = Pagination::new(page, limit, total);

    let sql = format!(
        r#"
        SELECT user_id, name, email, role, account_name, active_status,
               created_at, updated_at
        FROM users
        {USER_FILTER}
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let users = sqlx::query_as::<_, UserSummary>(&sql)
        .bind(role)
        .bind(search.as_deref())
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&app_state.pool)
        .await?;

    Ok(DataResponse::ok(UsersPage { users, pagination }))
}

#[derive(Serialize, sqlx::FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserCounts {
    team_members_led: i64,
    team_memberships: i64,
    projects_created: i64,
    project_memberships: i64,
    client_projects: i64,
    tasks_created: i64,
}

#[derive(Serialize)]
pub struct UserDetails {
    user: UserProfile,
    counts: UserCounts,
}

#[instrument(name = "Admin get user details", skip(app_state))]
pub(crate) async fn get_user_details(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<DataResponse<UserDetails>>, AppError> {
    let user = get_profile(&app_state.pool, user_id)
        .await?
        .ok_or_else(user_not_found)?;

    let counts = sqlx::query_as::<_, UserCounts>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM user_teams WHERE leader_id = $1) AS team_members_led,
            (SELECT COUNT(*) FROM user_teams WHERE user_id = $1) AS team_memberships,
            (SELECT COUNT(*) FROM projects WHERE created_by = $1) AS projects_created,
            (SELECT COUNT(*) FROM project_members WHERE user_id = $1) AS project_memberships,
            (SELECT COUNT(*) FROM project_clients WHERE user_id = $1) AS client_projects,
            (SELECT COUNT(*) FROM tasks WHERE created_by = $1) AS tasks_created
        "#,
    )
    .bind(user_id)
    .fetch_one(&app_state.pool)
    .await?;

    Ok(DataResponse::ok(UserDetails { user, counts }))
}

#[derive(Deserialize, Debug)]
pub struct RoleBody {
    role: Role,
}

#[derive(Serialize)]
pub struct UserData {
    user: UserProfile,
}

#[derive(Serialize)]
pub struct UserActionResponse {
    success: bool,
    message: &'static str,
    data: UserData,
}

/// Unlike the self-service route, admins may hand out any role, ADMIN included.
#[instrument(name = "Admin update user role", skip(app_state, admin), fields(admin_id = %admin.user_id))]
pub(crate) async fn update_user_role(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
    JsonBody(body): JsonBody<RoleBody>,
) -> Result<Json<UserActionResponse>, AppError> {
    if !set_role(&app_state.pool, user_id, body.role).await? {
        return Err(user_not_found());
    }
    let user = get_profile(&app_state.pool, user_id)
        .await?
        .ok_or_else(user_not_found)?;

    tracing::info!(user_id = %user_id, role = %body.role, "Role changed by an admin");
    Ok(Json(UserActionResponse {
        success: true,
        message: "User role updated successfully",
        data: UserData { user },
    }))
}

#[derive(Deserialize, Debug)]
pub struct CreateAdminBody {
    name: UserName,
    email: UserEmail,
    password: Password,
    account_name: Option<String>,
}

#[instrument(
    name = "Admin create admin",
    skip(app_state, admin, body),
    fields(admin_id = %admin.user_id, email = %body.email)
)]
pub(crate) async fn create_admin(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<CreateAdminBody>,
) -> Result<(StatusCode, Json<UserActionResponse>), AppError> {
    if email_taken(&app_state.pool, &body.email).await? {
        return Err(AppError::bad_request("User with this email already exists"));
    }

    let password_hash = hash_password(body.password.into_secret()).await?;
    let account_name = non_blank(body.account_name);
    let user_id = insert_user(
        &app_state.pool,
        &NewUser {
            name: body.name.as_ref(),
            email: body.email.as_ref(),
            password_hash: password_hash.expose_secret(),
            role: Role::Admin,
            account_name: account_name.as_deref(),
            bring: None,
            teams_member_count: None,
            focus: &[],
            hear_about_as: None,
        },
    )
    .await?;
    let user = get_profile(&app_state.pool, user_id)
        .await?
        .context("Created admin is missing")?;

    Ok((
        StatusCode::CREATED,
        Json(UserActionResponse {
            success: true,
            message: "Admin user created successfully",
            data: UserData { user },
        }),
    ))
}

/// Foreign keys cascade the user's teams, projects, tasks, memberships, OTPs
/// and invitations. The registration request for the email goes too so the
/// address can register again.
#[instrument(name = "Admin delete user", skip(app_state, admin), fields(admin_id = %admin.user_id))]
pub(crate) async fn delete_user(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let mut tx = app_state
        .pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;

    let user = get_profile(&mut *tx, user_id)
        .await?
        .ok_or_else(user_not_found)?;
    if user.user_id == admin.user_id {
        return Err(AppError::bad_request("Cannot delete your own account"));
    }
    if user.role()? == Role::Admin {
        return Err(AppError::bad_request("Cannot delete other admin users"));
    }

    sqlx::query("DELETE FROM users WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM registration_requests WHERE email = $1")
        .bind(&user.email)
        .execute(&mut *tx)
        .await?;

    tx.commit()
        .await
        .context("Failed to commit SQL transaction to delete a user.")?;

    tracing::info!(user_id = %user_id, "User deleted by an admin");
    Ok(MessageResponse::ok(format!(
        "User {} and all related data deleted successfully",
        user.name
    )))
}

fn user_not_found() -> AppError {
    AppError::not_found("User not found")
}
