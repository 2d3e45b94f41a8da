use reqwest::Method;

use crate::helpers::spawn_app;

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;

    let response = app
        .post_json(
            "/api/v1/user/login",
            &serde_json::json!({ "email": user.email, "password": "not-the-password" }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn login_then_verify_issues_a_session() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;

    let response = app
        .post_json(
            "/api/v1/user/login",
            &serde_json::json!({ "email": user.email, "password": user.password }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let otp = app.last_otp_for(&user.email).await;
    let response = app
        .post_json(
            "/api/v1/user/verify",
            &serde_json::json!({ "email": user.email, "OTP": otp }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("No session cookie was set");
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));

    let body: serde_json::Value = response.json().await.unwrap();
    let token = body["token"].as_str().expect("No token in the body");
    assert_eq!(body["user"]["email"], user.email.as_str());

    let response = app
        .request(Method::GET, "/api/v1/user/get")
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn an_otp_can_only_be_used_once() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;
    app.store_otp(user.user_id, 123456, time::Duration::seconds(10))
        .await;
    let body = serde_json::json!({ "email": user.email, "OTP": 123456 });

    let first = app.post_json("/api/v1/user/verify", &body).await;
    let second = app.post_json("/api/v1/user/verify", &body).await;

    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 401);
}

#[tokio::test]
async fn an_expired_otp_is_rejected_and_removed() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;
    app.store_otp(user.user_id, 654321, time::Duration::minutes(6))
        .await;

    let response = app
        .post_json(
            "/api/v1/user/verify",
            &serde_json::json!({ "email": user.email, "OTP": 654321 }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid OTP or expired");

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM otps WHERE user_id = $1")
            .bind(user.user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn a_new_login_replaces_the_previous_otp() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;
    let credentials =
        serde_json::json!({ "email": user.email, "password": user.password });

    app.post_json("/api/v1/user/login", &credentials).await;
    app.post_json("/api/v1/user/login", &credentials).await;

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM otps WHERE user_id = $1")
            .bind(user.user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = spawn_app().await;

    let response = app
        .request(Method::GET, "/api/v1/user/get")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Unauthorized user");

    let response = app
        .request(Method::GET, "/api/v1/user/get")
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn the_session_cookie_is_accepted() {
    let app = spawn_app().await;
    let user = app.store_user("CLIENT").await;

    let response = app
        .request(Method::GET, "/api/v1/user/get")
        .header("Cookie", format!("token={}", app.token_for(user.user_id)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn tokens_of_deleted_users_are_rejected_with_404() {
    let app = spawn_app().await;
    let token = app.token_for(uuid::Uuid::new_v4());

    let response = app
        .request(Method::GET, "/api/v1/user/get")
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn users_cannot_promote_themselves_to_admin() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;

    let response = app
        .authed(Method::PUT, "/api/v1/user/update-role", user.user_id)
        .json(&serde_json::json!({ "role": "ADMIN" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn forgot_password_answers_the_same_for_unknown_emails() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;

    let known = app
        .post_json(
            "/api/v1/user/forgot-password",
            &serde_json::json!({ "email": user.email }),
        )
        .await;
    let unknown = app
        .post_json(
            "/api/v1/user/forgot-password",
            &serde_json::json!({ "email": "nobody@example.com" }),
        )
        .await;

    assert_eq!(known.status().as_u16(), 200);
    assert_eq!(unknown.status().as_u16(), 200);
    let known: serde_json::Value = known.json().await.unwrap();
    let unknown: serde_json::Value = unknown.json().await.unwrap();
    assert_eq!(known["message"], unknown["message"]);
}

#[tokio::test]
async fn reset_password_rejects_unknown_tokens() {
    let app = spawn_app().await;

    let response = app
        .post_json(
            "/api/v1/user/reset-password",
            &serde_json::json!({
                "token": "ab".repeat(32),
                "newPassword": "another-long-password"
            }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn verify_accepts_a_code_without_an_email() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;
    app.store_otp(user.user_id, 246810, time::Duration::seconds(10))
        .await;

    let response = app
        .post_json("/api/v1/user/verify", &serde_json::json!({ "OTP": 246810 }))
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["email"], user.email.as_str());
}

#[tokio::test]
async fn verify_scoped_to_another_email_rejects_the_code() {
    let app = spawn_app().await;
    let owner = app.store_user("PROVIDER").await;
    let other = app.store_user("PROVIDER").await;
    app.store_otp(owner.user_id, 135790, time::Duration::seconds(10))
        .await;

    let wrong_user = app
        .post_json(
            "/api/v1/user/verify",
            &serde_json::json!({ "email": other.email, "OTP": 135790 }),
        )
        .await;
    let unknown = app
        .post_json(
            "/api/v1/user/verify",
            &serde_json::json!({ "email": "ghost@example.com", "OTP": 135790 }),
        )
        .await;

    assert_eq!(wrong_user.status().as_u16(), 401);
    assert_eq!(unknown.status().as_u16(), 401);
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM otps WHERE user_id = $1")
            .bind(owner.user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn resend_otp_issues_a_fresh_code() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;
    app.store_otp(user.user_id, 111111, time::Duration::minutes(1))
        .await;

    let response = app
        .post_json(
            "/api/v1/user/resend-otp",
            &serde_json::json!({ "email": user.email }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM otps WHERE user_id = $1")
            .bind(user.user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    let otp = app.last_otp_for(&user.email).await;
    let response = app
        .post_json(
            "/api/v1/user/verify",
            &serde_json::json!({ "email": user.email, "OTP": otp }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post_json(
            "/api/v1/user/resend-otp",
            &serde_json::json!({ "email": "ghost@example.com" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn logout_expires_the_session_cookie() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;

    let response = app
        .authed(Method::GET, "/api/v1/user/logout", user.user_id)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .expect("No cookie was set");
    assert!(cookie.starts_with("token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn profile_updates_need_at_least_one_field() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;

    let response = app
        .authed(Method::PUT, "/api/v1/user/update", user.user_id)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .authed(Method::PUT, "/api/v1/user/update", user.user_id)
        .json(&serde_json::json!({ "name": "Smith (Partner)", "account_name": "Smith Law" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["user"]["name"], "Smith (Partner)");
    assert_eq!(body["user"]["account_name"], "Smith Law");
}

#[tokio::test]
async fn changing_password_checks_the_current_one() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;

    let response = app
        .authed(Method::PUT, "/api/v1/user/change-password", user.user_id)
        .json(&serde_json::json!({
            "currentPassword": "not-the-password",
            "newPassword": "brand-new-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Current password is incorrect");

    let response = app
        .authed(Method::PUT, "/api/v1/user/change-password", user.user_id)
        .json(&serde_json::json!({
            "currentPassword": user.password,
            "newPassword": "brand-new-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let old = app
        .post_json(
            "/api/v1/user/login",
            &serde_json::json!({ "email": user.email, "password": user.password }),
        )
        .await;
    let new = app
        .post_json(
            "/api/v1/user/login",
            &serde_json::json!({ "email": user.email, "password": "brand-new-password" }),
        )
        .await;
    assert_eq!(old.status().as_u16(), 401);
    assert_eq!(new.status().as_u16(), 200);
}

#[tokio::test]
async fn a_mailed_reset_link_sets_a_new_password_once() {
    let app = spawn_app().await;
    app.mock_email_api().await;
    let user = app.store_user("PROVIDER").await;

    app.post_json(
        "/api/v1/user/forgot-password",
        &serde_json::json!({ "email": user.email }),
    )
    .await;
    let token = app
        .sent_emails()
        .await
        .iter()
        .filter(|email| email["To"] == user.email.as_str())
        .filter_map(|email| email["TextBody"].as_str())
        .find_map(|text| text.split("token=").nth(1))
        .map(|rest| rest.chars().take_while(char::is_ascii_hexdigit).collect::<String>())
        .expect("No reset link was mailed");

    let body = serde_json::json!({ "token": token, "newPassword": "reset-long-password" });
    let first = app.post_json("/api/v1/user/reset-password", &body).await;
    let again = app.post_json("/api/v1/user/reset-password", &body).await;
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(again.status().as_u16(), 400);

    let response = app
        .post_json(
            "/api/v1/user/login",
            &serde_json::json!({ "email": user.email, "password": "reset-long-password" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn an_undeliverable_reset_email_clears_the_token() {
    let app = spawn_app().await;
    let user = app.store_user("PROVIDER").await;
    wiremock::Mock::given(wiremock::matchers::path("/email"))
        .respond_with(wiremock::ResponseTemplate::new(500))
        .mount(&app.email_server)
        .await;

    let response = app
        .post_json(
            "/api/v1/user/forgot-password",
            &serde_json::json!({ "email": user.email }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 500);
    let token_hash: Option<String> =
        sqlx::query_scalar("SELECT reset_token_hash FROM users WHERE user_id = $1")
            .bind(user.user_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(token_hash, None);
}
