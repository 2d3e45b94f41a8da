//! Team links and project membership rows.

use sqlx::PgExecutor;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::Role;

/// Legal role fields carried from an invitation to the rows it creates.
#[derive(Debug, Clone, Default)]
pub struct LegalRole {
    pub legal_role: Option<String>,
    pub custom_legal_role: Option<String>,
}

#[instrument(name = "Check team link", skip(executor))]
pub async fn team_link_exists<'c>(
    executor: impl PgExecutor<'c>,
    user_id: Uuid,
    leader_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM user_teams WHERE user_id = $1 AND leader_id = $2
        )
        "#,
    )
    .bind(user_id)
    .bind(leader_id)
    .fetch_one(executor)
    .await
}

#[instrument(name = "Insert team link", skip(executor, legal))]
pub async fn insert_team_link<'c>(
    executor: impl PgExecutor<'c>,
    user_id: Uuid,
    leader_id: Uuid,
    role: Role,
    legal: &LegalRole,
) -> Result<Uuid, sqlx::Error> {
    let team_member_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO user_teams (
            team_member_id, user_id, leader_id, role, legal_role, custom_legal_role
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(team_member_id)
    .bind(user_id)
    .bind(leader_id)
    .bind(role.as_str())
    .bind(legal.legal_role.as_deref())
    .bind(legal.custom_legal_role.as_deref())
    .execute(executor)
    .await?;

    Ok(team_member_id)
}

/// Creates the team link or refreshes its role fields when it already exists.
#[instrument(name = "Upsert team link", skip(executor, legal))]
pub async fn upsert_team_link<'c>(
    executor: impl PgExecutor<'c>,
    user_id: Uuid,
    leader_id: Uuid,
    role: Role,
    legal: &LegalRole,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_teams (
            team_member_id, user_id, leader_id, role, legal_role, custom_legal_role
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, leader_id) DO UPDATE
        SET role = EXCLUDED.role,
            legal_role = EXCLUDED.legal_role,
            custom_legal_role = EXCLUDED.custom_legal_role
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(leader_id)
    .bind(role.as_str())
    .bind(legal.legal_role.as_deref())
    .bind(legal.custom_legal_role.as_deref())
    .execute(executor)
    .await?;

    Ok(())
}

#[instrument(name = "Upsert project member", skip(executor, legal))]
pub async fn upsert_project_member<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
    user_id: Uuid,
    role: Role,
    legal: &LegalRole,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO project_members (
            project_member_id, project_id, user_id, role, legal_role, custom_legal_role
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (project_id, user_id) DO UPDATE
        SET role = EXCLUDED.role,
            legal_role = EXCLUDED.legal_role,
            custom_legal_role = EXCLUDED.custom_legal_role
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(legal.legal_role.as_deref())
    .bind(legal.custom_legal_role.as_deref())
    .execute(executor)
    .await?;

    Ok(())
}

/// Returns `false` when the user already was a client of the project.
#[instrument(name = "Insert project client", skip(executor))]
pub async fn insert_project_client<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO project_clients (project_client_id, project_id, user_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (project_id, user_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(user_id)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(inserted > 0)
}

/// Creator of the project, `None` when it does not exist.
#[instrument(name = "Get project creator", skip(executor))]
pub async fn project_creator<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT created_by FROM projects WHERE project_id = $1")
        .bind(project_id)
        .fetch_optional(executor)
        .await
}

/// Creators, members and clients of a project can see it.
#[instrument(name = "Check project access", skip(executor))]
pub async fn can_access_project<'c>(
    executor: impl PgExecutor<'c>,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM projects
            WHERE project_id = $1 AND created_by = $2
            UNION ALL
            SELECT 1 FROM project_members
            WHERE project_id = $1 AND user_id = $2
            UNION ALL
            SELECT 1 FROM project_clients
            WHERE project_id = $1 AND user_id = $2
        )
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_one(executor)
    .await
}
