use reqwest::Method;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::helpers::{TestApp, TestUser, spawn_app, token_from_link};

async fn generate_team_invitation(app: &TestApp, leader: &TestUser, body: Value) -> String {
    let response = app
        .authed(Method::POST, "/api/v1/user/generate-team-invitation", leader.user_id)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    body["link"].as_str().expect("No link returned").to_string()
}

async fn create_project(app: &TestApp, owner: &TestUser) -> Uuid {
    let response = app
        .authed(Method::POST, "/api/v1/project", owner.user_id)
        .json(&json!({ "name": "Vance v. Oakridge" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    body["project"]["project_id"]
        .as_str()
        .and_then(|id| id.parse().ok())
        .expect("No project id returned")
}

fn signup_body(token: &str, email: &str) -> Value {
    json!({
        "token": token,
        "name": "Ged Sparrowhawk",
        "email": email,
        "password": "a-very-long-password",
    })
}

async fn stored_role(app: &TestApp, email: &str) -> String {
    sqlx::query_scalar("SELECT role FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(&app.pool)
        .await
        .expect("Failed to fetch the stored role")
}

#[tokio::test]
async fn team_signup_creates_a_linked_team_member() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let link = generate_team_invitation(&app, &leader, json!({ "role": "TEAM" })).await;
    assert!(link.contains("/join-team/"));

    let response = app
        .post_json(
            "/api/v1/user/team-signup",
            &signup_body(&token_from_link(&link), "ged@example.com"),
        )
        .await;

    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(stored_role(&app, "ged@example.com").await, "TEAM");
    let (leader_id, role): (Uuid, String) = sqlx::query_as(
        r#"
        SELECT t.leader_id, t.role
        FROM user_teams t
        JOIN users u ON u.user_id = t.user_id
        WHERE u.email = $1
        "#,
    )
    .bind("ged@example.com")
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(leader_id, leader.user_id);
    assert_eq!(role, "TEAM");
}

#[tokio::test]
async fn an_invitation_can_only_be_used_once() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let link = generate_team_invitation(&app, &leader, json!({ "role": "BILLER" })).await;
    let token = token_from_link(&link);

    let first = app
        .post_json("/api/v1/user/team-signup", &signup_body(&token, "first@example.com"))
        .await;
    let second = app
        .post_json("/api/v1/user/team-signup", &signup_body(&token, "second@example.com"))
        .await;

    assert_eq!(first.status().as_u16(), 201);
    assert_eq!(stored_role(&app, "first@example.com").await, "BILLER");
    assert_eq!(second.status().as_u16(), 400);
}

#[tokio::test]
async fn an_expired_invitation_is_rejected() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let link = generate_team_invitation(&app, &leader, json!({ "role": "TEAM" })).await;
    sqlx::query("UPDATE invitations SET expires_at = NOW() - INTERVAL '1 minute'")
        .execute(&app.pool)
        .await
        .unwrap();

    let response = app
        .post_json(
            "/api/v1/user/team-signup",
            &signup_body(&token_from_link(&link), "late@example.com"),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid or expired invitation link");
}

#[tokio::test]
async fn an_email_bound_invitation_refuses_other_emails() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let leader = app.store_user("PROVIDER").await;
    let link = generate_team_invitation(
        &app,
        &leader,
        json!({ "role": "TEAM", "invited_email": "invitee@example.com" }),
    )
    .await;

    let response = app
        .post_json(
            "/api/v1/user/team-signup",
            &signup_body(&token_from_link(&link), "intruder@example.com"),
        )
        .await;

    assert_eq!(response.status().as_u16(), 403);
    let sent = app.sent_emails().await;
    assert!(sent.iter().any(|email| email["To"] == "invitee@example.com"));
}

#[tokio::test]
async fn team_signup_rejects_an_email_already_in_use() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let existing = app.store_user("PROVIDER").await;
    let link = generate_team_invitation(&app, &leader, json!({ "role": "TEAM" })).await;

    let response = app
        .post_json(
            "/api/v1/user/team-signup",
            &signup_body(&token_from_link(&link), &existing.email),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
    let unused: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invitations")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(unused, 1);
}

#[tokio::test]
async fn an_existing_user_joins_a_team_once() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let member = app.store_user("PROVIDER").await;

    let link = generate_team_invitation(&app, &leader, json!({ "role": "TEAM" })).await;
    let response = app
        .authed(Method::POST, "/api/v1/user/join-team", member.user_id)
        .json(&json!({ "token": token_from_link(&link) }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(stored_role(&app, &member.email).await, "TEAM");

    let link = generate_team_invitation(&app, &leader, json!({ "role": "TEAM" })).await;
    let response = app
        .authed(Method::POST, "/api/v1/user/join-team", member.user_id)
        .json(&json!({ "token": token_from_link(&link) }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn a_client_signs_up_through_a_project_invitation() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let project_id = create_project(&app, &owner).await;

    let response = app
        .authed(Method::POST, "/api/v1/project/invite", owner.user_id)
        .json(&json!({ "role": "CLIENT", "projectId": project_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let link = body["link"].as_str().unwrap();
    assert!(link.contains("/join-project/"));

    let response = app
        .post_json(
            "/api/v1/user/client-signup",
            &signup_body(&token_from_link(link), "client@example.com"),
        )
        .await;

    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(stored_role(&app, "client@example.com").await, "CLIENT");
    let clients: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM project_clients WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(clients, 1);
}

#[tokio::test]
async fn client_invitations_need_a_project() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;

    let response = app
        .authed(Method::POST, "/api/v1/project/invite", owner.user_id)
        .json(&json!({ "role": "CLIENT" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn only_the_project_creator_can_invite_to_it() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let stranger = app.store_user("PROVIDER").await;
    let project_id = create_project(&app, &owner).await;

    let response = app
        .authed(Method::POST, "/api/v1/project/invite", stranger.user_id)
        .json(&json!({ "role": "TEAM", "projectId": project_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .authed(Method::POST, "/api/v1/project/invite", owner.user_id)
        .json(&json!({ "role": "TEAM", "projectId": Uuid::new_v4() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn joining_a_project_as_team_adds_membership() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let member = app.store_user("PROVIDER").await;
    let project_id = create_project(&app, &owner).await;

    let response = app
        .authed(Method::POST, "/api/v1/project/invite", owner.user_id)
        .json(&json!({ "role": "TEAM", "projectId": project_id, "legalRole": "Paralegal" }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let token = token_from_link(body["link"].as_str().unwrap());

    let response = app
        .authed(Method::POST, "/api/v1/project/join", member.user_id)
        .json(&json!({ "token": token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let response = app
        .authed(Method::GET, &format!("/api/v1/project/{project_id}"), member.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    let members = body["project"]["members"].as_array().unwrap();
    assert!(members.iter().any(|m| {
        m["email"] == member.email.as_str()
            && m["role"] == "TEAM"
            && m["legal_role"] == "Paralegal"
    }));
}

#[tokio::test]
async fn approval_applies_a_pending_invitation() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let leader = app.store_user("PROVIDER").await;
    generate_team_invitation(
        &app,
        &leader,
        json!({ "role": "BILLER", "invited_email": "pending@example.com" }),
    )
    .await;

    let response = app
        .post_register(&crate::helpers::registration_body("pending@example.com"))
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let request_id: Uuid = sqlx::query_scalar(
        "SELECT request_id FROM registration_requests WHERE email = $1",
    )
    .bind("pending@example.com")
    .fetch_one(&app.pool)
    .await
    .unwrap();

    let response = app
        .authed(Method::POST, "/api/v1/admin/requests/approve", app.admin.user_id)
        .json(&json!({ "request_id": request_id }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(stored_role(&app, "pending@example.com").await, "BILLER");
    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invitations")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(left, 0);
}

async fn add_directly(
    app: &TestApp,
    leader: &TestUser,
    email: &str,
    role: &str,
) -> reqwest::Response {
    app.authed(Method::POST, "/api/v1/user/invite-team-member", leader.user_id)
        .json(&json!({ "email": email, "role": role, "legalRole": "Associate" }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn adding_a_team_member_directly_applies_the_promotion_rule() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let provider = app.store_user("PROVIDER").await;
    let client = app.store_user("CLIENT").await;
    let biller = app.store_user("CLIENT").await;

    let response = add_directly(&app, &leader, &provider.email, "TEAM").await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["teamMember"]["legal_role"], "Associate");
    assert_eq!(stored_role(&app, &provider.email).await, "TEAM");

    let response = add_directly(&app, &leader, &client.email, "TEAM").await;
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(stored_role(&app, &client.email).await, "CLIENT");

    let response = add_directly(&app, &leader, &biller.email, "BILLER").await;
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(stored_role(&app, &biller.email).await, "BILLER");
}

#[tokio::test]
async fn adding_a_team_member_directly_rejects_duplicates_and_strangers() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let member = app.store_user("PROVIDER").await;

    assert_eq!(add_directly(&app, &leader, &member.email, "TEAM").await.status().as_u16(), 201);
    assert_eq!(add_directly(&app, &leader, &member.email, "BILLER").await.status().as_u16(), 400);
    assert_eq!(
        add_directly(&app, &leader, "ghost@example.com", "TEAM").await.status().as_u16(),
        404
    );
}

#[tokio::test]
async fn leaders_manage_only_their_own_team_links() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let other_leader = app.store_user("PROVIDER").await;
    let member = app.store_user("PROVIDER").await;
    let response = add_directly(&app, &leader, &member.email, "TEAM").await;
    let body: Value = response.json().await.unwrap();
    let route = format!(
        "/api/v1/user/team-members/{}",
        body["teamMember"]["team_member_id"].as_str().unwrap()
    );

    let response = app
        .authed(Method::PATCH, &route, other_leader.user_id)
        .json(&json!({ "role": "BILLER" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .authed(Method::PATCH, &route, leader.user_id)
        .json(&json!({ "role": "BILLER", "legalRole": "Paralegal" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["teamMember"]["role"], "BILLER");
    assert_eq!(body["teamMember"]["legal_role"], "Paralegal");

    let response = app
        .authed(Method::GET, "/api/v1/user/team-members", leader.user_id)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["teamMembers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn removing_a_team_member_drops_them_from_the_leaders_projects() {
    let app = spawn_app().await;
    let leader = app.store_user("PROVIDER").await;
    let other_leader = app.store_user("PROVIDER").await;
    let member = app.store_user("PROVIDER").await;
    let leaders_project = create_project(&app, &leader).await;
    let other_project = create_project(&app, &other_leader).await;

    let response = add_directly(&app, &leader, &member.email, "TEAM").await;
    let body: Value = response.json().await.unwrap();
    let team_member_id = body["teamMember"]["team_member_id"].as_str().unwrap().to_string();
    for project_id in [leaders_project, other_project] {
        sqlx::query(
            r#"
            INSERT INTO project_members (project_member_id, project_id, user_id, role)
            VALUES ($1, $2, $3, 'TEAM')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(member.user_id)
        .execute(&app.pool)
        .await
        .unwrap();
    }
    let route = format!("/api/v1/user/team-members/{team_member_id}");

    let response = app
        .authed(Method::DELETE, &route, leader.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["removedProjectMemberships"], 1);

    let seats: Vec<Uuid> =
        sqlx::query_scalar("SELECT project_id FROM project_members WHERE user_id = $1")
            .bind(member.user_id)
            .fetch_all(&app.pool)
            .await
            .unwrap();
    assert_eq!(seats, vec![other_project]);

    let response = app
        .authed(Method::DELETE, &route, leader.user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn a_signed_out_user_joins_a_team_by_email() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let leader = app.store_user("PROVIDER").await;
    let member = app.store_user("PROVIDER").await;
    let link = generate_team_invitation(&app, &leader, json!({ "role": "BILLER" })).await;
    let token = token_from_link(&link);

    let response = app
        .post_json(
            "/api/v1/user/join-team-invitation",
            &json!({ "token": token, "email": "ghost@example.com" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .post_json(
            "/api/v1/user/join-team-invitation",
            &json!({ "token": token, "email": member.email }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["requiresVerification"], true);
    assert_eq!(stored_role(&app, &member.email).await, "BILLER");

    // The mailed code completes the sign in.
    let otp = app.last_otp_for(&member.email).await;
    let response = app
        .post_json("/api/v1/user/verify", &json!({ "email": member.email, "OTP": otp }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

async fn project_invitation(app: &TestApp, owner: &TestUser, body: Value) -> String {
    let response = app
        .authed(Method::POST, "/api/v1/project/invite", owner.user_id)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    token_from_link(body["link"].as_str().unwrap())
}

#[tokio::test]
async fn joining_a_project_by_email_asks_unknown_invitees_to_register() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let project_id = create_project(&app, &owner).await;
    let token = project_invitation(
        &app,
        &owner,
        json!({ "role": "TEAM", "projectId": project_id, "legalRole": "Paralegal" }),
    )
    .await;

    let response = app
        .post_json(
            "/api/v1/project/join-invitation",
            &json!({ "token": token, "email": "newcomer@example.com" }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["requiresRegistration"], true);
    assert_eq!(body["invitation"]["role"], "TEAM");
    assert_eq!(body["invitation"]["project_id"], project_id.to_string());
    assert_eq!(body["invitation"]["legalRole"], "Paralegal");
    let kept: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invitations")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(kept, 1);
}

#[tokio::test]
async fn joining_a_project_by_email_adds_an_existing_user() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let owner = app.store_user("PROVIDER").await;
    let client = app.store_user("PROVIDER").await;
    let project_id = create_project(&app, &owner).await;
    let token = project_invitation(
        &app,
        &owner,
        json!({ "role": "CLIENT", "projectId": project_id }),
    )
    .await;

    let response = app
        .post_json(
            "/api/v1/project/join-invitation",
            &json!({ "token": token, "email": client.email }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["requiresVerification"], true);
    assert_eq!(stored_role(&app, &client.email).await, "CLIENT");
    let seats: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM project_clients WHERE project_id = $1 AND user_id = $2",
    )
    .bind(project_id)
    .bind(client.user_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(seats, 1);

    let response = app
        .post_json(
            "/api/v1/project/join-invitation",
            &json!({ "token": token, "email": client.email }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let otps: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM otps WHERE user_id = $1")
        .bind(client.user_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(otps, 1);
}
