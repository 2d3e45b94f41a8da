use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    accounts::{UserProfile, get_profile, set_role},
    app_state::AppState,
    authentication::AuthenticatedUser,
    domain::{Role, UserName},
    utils::{AppError, JsonBody, non_blank},
};

#[derive(Serialize)]
pub struct UserResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    user: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[instrument(name = "Get current user", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn get_user(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserResponse>, AppError> {
    let profile = get_profile(&app_state.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let token = app_state.jwt.issue(user.user_id)?;

    Ok(Json(UserResponse {
        success: true,
        message: None,
        user: profile,
        token: Some(token),
    }))
}

#[derive(Deserialize, Debug)]
pub struct UpdateUserBody {
    name: Option<UserName>,
    account_name: Option<String>,
    bring: Option<String>,
    teams_member_count: Option<String>,
    focus: Option<Vec<String>>,
    hear_about_as: Option<String>,
}

impl UpdateUserBody {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.account_name.is_none()
            && self.bring.is_none()
            && self.teams_member_count.is_none()
            && self.focus.is_none()
            && self.hear_about_as.is_none()
    }
}

#[instrument(name = "Update current user", skip(app_state, user, body), fields(user_id = %user.user_id))]
pub(crate) async fn update_user(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<UpdateUserBody>,
) -> Result<Json<UserResponse>, AppError> {
    if body.is_empty() {
        return Err(AppError::bad_request("No fields provided for update"));
    }

    sqlx::query(
        r#"
        UPDATE users
        SET name = COALESCE($1, name),
            account_name = COALESCE($2, account_name),
            bring = COALESCE($3, bring),
            teams_member_count = COALESCE($4, teams_member_count),
            focus = COALESCE($5, focus),
            hear_about_as = COALESCE($6, hear_about_as),
            updated_at = NOW()
        WHERE user_id = $7
        "#,
    )
    .bind(body.name.as_ref().map(|n| n.as_ref()))
    .bind(non_blank(body.account_name))
    .bind(non_blank(body.bring))
    .bind(non_blank(body.teams_member_count))
    .bind(body.focus)
    .bind(non_blank(body.hear_about_as))
    .bind(user.user_id)
    .execute(&app_state.pool)
    .await
    .context("Failed to update the user profile")?;

    let profile = get_profile(&app_state.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(UserResponse {
        success: true,
        message: Some("User updated successfully"),
        user: profile,
        token: None,
    }))
}

#[derive(Deserialize, Debug)]
pub struct UpdateRoleBody {
    role: Role,
}

#[instrument(name = "Update own role", skip(app_state, user), fields(user_id = %user.user_id))]
pub(crate) async fn update_role(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    JsonBody(body): JsonBody<UpdateRoleBody>,
) -> Result<Json<UserResponse>, AppError> {
    if body.role == Role::Admin {
        return Err(AppError::forbidden("You cannot assign yourself the ADMIN role"));
    }

    set_role(&app_state.pool, user.user_id, body.role).await?;
    let profile = get_profile(&app_state.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(UserResponse {
        success: true,
        message: Some("Role updated successfully"),
        user: profile,
        token: None,
    }))
}
