mod catalog;
mod overview;
mod requests;
mod users;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};

use crate::app_state::AppState;
use crate::authentication::{reject_anonymous_users, require_admin};

pub fn router(app_state: Arc<AppState>) -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/dashboard-stats", get(overview::dashboard_stats))
        .route("/system-overview", get(overview::system_overview))
        .route("/analytics", get(overview::analytics))
        .route("/requests", get(requests::list_requests))
        .route("/requests/pending", get(requests::pending_requests))
        .route("/requests/approve", post(requests::approve_request))
        .route("/requests/reject", post(requests::reject_request))
        .route("/requests/{id}", get(requests::get_request))
        .route("/users", get(users::list_users))
        .route("/users/create-admin", post(users::create_admin))
        .route(
            "/users/{id}",
            get(users::get_user_details).delete(users::delete_user),
        )
        .route("/users/{id}/role", put(users::update_user_role))
        .route("/projects", get(catalog::list_projects))
        .route("/tasks", get(catalog::list_tasks))
        // Layers run outermost first: authenticate, then check the role.
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(app_state, reject_anonymous_users))
}
