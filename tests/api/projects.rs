use reqwest::Method;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::helpers::{TestApp, TestUser, spawn_app};

async fn create_project(app: &TestApp, owner: &TestUser, name: &str) -> Value {
    let response = app
        .authed(Method::POST, "/api/v1/project", owner.user_id)
        .json(&json!({ "name": name, "client_name": "Oakridge Holdings" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    body["project"].clone()
}

fn id_of(value: &Value, field: &str) -> Uuid {
    value[field]
        .as_str()
        .and_then(|id| id.parse().ok())
        .unwrap_or_else(|| panic!("No {field} in {value}"))
}

async fn create_task(app: &TestApp, user: &TestUser, project_id: Uuid) -> reqwest::Response {
    app.authed(Method::POST, "/api/v1/task", user.user_id)
        .json(&json!({
            "project_id": project_id,
            "name": "Draft the complaint",
            "priority": "HIGH",
            "status": "TO_DO",
        }))
        .send()
        .await
        .unwrap()
}

async fn add_member(app: &TestApp, project_id: Uuid, user: &TestUser, role: &str) {
    sqlx::query(
        r#"
        INSERT INTO project_members (project_member_id, project_id, user_id, role)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(project_id)
    .bind(user.user_id)
    .bind(role)
    .execute(&app.pool)
    .await
    .expect("Failed to add project member");
}

#[tokio::test]
async fn the_creator_becomes_a_provider_member() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;

    let project = create_project(&app, &owner, "Vance v. Oakridge").await;

    assert_eq!(project["priority"], "NONE");
    assert_eq!(project["status"], "OPEN");
    let role: String = sqlx::query_scalar(
        "SELECT role FROM project_members WHERE project_id = $1 AND user_id = $2",
    )
    .bind(id_of(&project, "project_id"))
    .bind(owner.user_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(role, "PROVIDER");
}

#[tokio::test]
async fn a_project_needs_a_name() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;

    let response = app
        .authed(Method::POST, "/api/v1/project", owner.user_id)
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
async fn projects_are_only_listed_for_people_on_them() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let stranger = app.store_user("PROVIDER").await;
    let project = create_project(&app, &owner, "Estate of Hale").await;
    let project_id = id_of(&project, "project_id");

    let listed = |user: Uuid| {
        let app = &app;
        async move {
            let response = app
                .authed(Method::GET, "/api/v1/project", user)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status().as_u16(), 200);
            let body: Value = response.json().await.unwrap();
            body["projects"].as_array().unwrap().len()
        }
    };
    assert_eq!(listed(owner.user_id).await, 1);
    assert_eq!(listed(stranger.user_id).await, 0);

    let response = app
        .authed(Method::GET, &format!("/api/v1/project/{project_id}"), stranger.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn only_the_creator_deletes_a_project() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let member = app.store_user("TEAM").await;
    let project = create_project(&app, &owner, "In re Marsh").await;
    let project_id = id_of(&project, "project_id");
    add_member(&app, project_id, &member, "TEAM").await;
    let route = format!("/api/v1/project/{project_id}");

    let response = app
        .authed(Method::DELETE, &route, member.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .authed(Method::DELETE, &route, owner.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let memberships: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM project_members WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(memberships, 0);

    let response = app
        .authed(Method::DELETE, &route, owner.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn removing_members_is_reserved_to_the_creator() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let member = app.store_user("TEAM").await;
    let project = create_project(&app, &owner, "Doe v. City").await;
    let project_id = id_of(&project, "project_id");
    add_member(&app, project_id, &member, "TEAM").await;

    let remove = |caller: Uuid, target: Uuid| {
        app.authed(
            Method::DELETE,
            &format!("/api/v1/project/{project_id}/members/{target}"),
            caller,
        )
        .send()
    };

    assert_eq!(remove(member.user_id, owner.user_id).await.unwrap().status().as_u16(), 403);
    assert_eq!(remove(owner.user_id, owner.user_id).await.unwrap().status().as_u16(), 400);
    assert_eq!(remove(owner.user_id, member.user_id).await.unwrap().status().as_u16(), 200);
    assert_eq!(remove(owner.user_id, member.user_id).await.unwrap().status().as_u16(), 404);
}

#[tokio::test]
async fn members_are_listed_with_clients() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let project = create_project(&app, &owner, "Roe Trust").await;
    let project_id = id_of(&project, "project_id");

    let response = app
        .authed(Method::GET, &format!("/api/v1/project/{project_id}/members"), owner.user_id)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["members"].as_array().unwrap().len(), 1);
    assert_eq!(body["clients"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn providers_on_a_project_create_tasks() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let project = create_project(&app, &owner, "Vance v. Oakridge").await;
    let project_id = id_of(&project, "project_id");

    let response = create_task(&app, &owner, project_id).await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["task"]["priority"], "HIGH");
    assert_eq!(body["task"]["status"], "TO_DO");

    let response = app
        .authed(Method::GET, &format!("/api/v1/task/project/{project_id}"), owner.user_id)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn non_providers_cannot_create_tasks() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let member = app.store_user("TEAM").await;
    let stranger = app.store_user("PROVIDER").await;
    let project = create_project(&app, &owner, "Vance v. Oakridge").await;
    let project_id = id_of(&project, "project_id");
    add_member(&app, project_id, &member, "TEAM").await;

    assert_eq!(create_task(&app, &member, project_id).await.status().as_u16(), 403);
    assert_eq!(create_task(&app, &stranger, project_id).await.status().as_u16(), 403);
    assert_eq!(create_task(&app, &owner, Uuid::new_v4()).await.status().as_u16(), 404);
}

#[tokio::test]
async fn outsiders_cannot_see_project_tasks() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let stranger = app.store_user("PROVIDER").await;
    let project = create_project(&app, &owner, "Vance v. Oakridge").await;
    let project_id = id_of(&project, "project_id");
    let response = create_task(&app, &owner, project_id).await;
    let body: Value = response.json().await.unwrap();
    let task_id = id_of(&body["task"], "task_id");

    let response = app
        .authed(Method::GET, &format!("/api/v1/task/project/{project_id}"), stranger.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .authed(Method::GET, &format!("/api/v1/task/{task_id}"), stranger.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn tasks_are_updated_and_deleted_by_their_managers() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let member = app.store_user("TEAM").await;
    let project = create_project(&app, &owner, "Vance v. Oakridge").await;
    let project_id = id_of(&project, "project_id");
    add_member(&app, project_id, &member, "TEAM").await;
    let response = create_task(&app, &owner, project_id).await;
    let body: Value = response.json().await.unwrap();
    let route = format!("/api/v1/task/{}", id_of(&body["task"], "task_id"));

    let response = app
        .authed(Method::PATCH, &route, owner.user_id)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .authed(Method::PATCH, &route, member.user_id)
        .json(&json!({ "status": "DONE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .authed(Method::PATCH, &route, owner.user_id)
        .json(&json!({ "status": "IN_PROGRESS" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["task"]["status"], "IN_PROGRESS");
    assert_eq!(body["task"]["name"], "Draft the complaint");

    let response = app
        .authed(Method::DELETE, &route, owner.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .authed(Method::GET, &route, owner.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn only_the_creator_updates_a_project() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let member = app.store_user("TEAM").await;
    let project = create_project(&app, &owner, "Vance v. Oakridge").await;
    let project_id = id_of(&project, "project_id");
    add_member(&app, project_id, &member, "TEAM").await;
    let route = format!("/api/v1/project/{project_id}");

    let update = |caller: Uuid, route: String, body: Value| {
        app.authed(Method::PATCH, &route, caller).json(&body).send()
    };

    let response = update(owner.user_id, route.clone(), json!({ "name": "  " })).await.unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = update(member.user_id, route.clone(), json!({ "status": "CLOSED" }))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let unknown = format!("/api/v1/project/{}", Uuid::new_v4());
    let response = update(owner.user_id, unknown, json!({ "status": "CLOSED" })).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = update(
        owner.user_id,
        route,
        json!({ "status": "CLOSED", "priority": "CRITICAL" }),
    )
    .await
    .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["project"]["status"], "CLOSED");
    assert_eq!(body["project"]["priority"], "CRITICAL");
    assert_eq!(body["project"]["name"], "Vance v. Oakridge");
    assert_eq!(body["project"]["client_name"], "Oakridge Holdings");
}
