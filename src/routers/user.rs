mod invitations;
mod login;
mod password;
mod profile;
mod register;
mod team;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};

use crate::app_state::AppState;
use crate::authentication::reject_anonymous_users;

pub fn router(app_state: Arc<AppState>) -> axum::Router<Arc<AppState>> {
    let public = axum::Router::new()
        .route("/register", post(register::register))
        .route("/login", post(login::login))
        .route("/verify", post(login::verify))
        .route("/resend-otp", post(login::resend_otp))
        .route("/forgot-password", post(password::forgot_password))
        .route("/reset-password", post(password::reset_password))
        .route(
            "/join-team-invitation",
            post(invitations::join_team_with_invitation),
        )
        .route("/team-signup", post(invitations::team_signup))
        .route("/client-signup", post(invitations::client_signup));

    let protected = axum::Router::new()
        .route("/logout", get(login::logout))
        .route("/change-password", put(password::change_password))
        .route("/get", get(profile::get_user))
        .route("/update", put(profile::update_user))
        .route("/update-role", put(profile::update_role))
        .route("/team-members", get(team::list_team_members))
        .route(
            "/team-members/{id}",
            delete(team::remove_team_member).patch(team::update_team_member),
        )
        .route("/invite-team-member", post(team::invite_team_member))
        .route(
            "/generate-team-invitation",
            post(invitations::generate_team_invitation),
        )
        .route("/join-team", post(invitations::join_team))
        .route_layer(from_fn_with_state(app_state, reject_anonymous_users));

    public.merge(protected)
}
