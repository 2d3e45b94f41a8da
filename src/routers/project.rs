mod crud;
mod invitations;
mod members;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};

use crate::app_state::AppState;
use crate::authentication::reject_anonymous_users;

pub fn router(app_state: Arc<AppState>) -> axum::Router<Arc<AppState>> {
    let public = axum::Router::new().route(
        "/join-invitation",
        post(invitations::join_project_with_invitation),
    );

    let protected = axum::Router::new()
        .route("/", post(crud::create_project).get(crud::list_projects))
        .route("/invite", post(invitations::invite_to_project))
        .route("/join", post(invitations::join_project))
        .route(
            "/{id}",
            get(crud::get_project)
                .patch(crud::update_project)
                .delete(crud::delete_project),
        )
        .route("/{id}/members", get(members::list_members))
        .route("/{id}/members/{user_id}", delete(members::remove_member))
        .route_layer(from_fn_with_state(app_state, reject_anonymous_users));

    public.merge(protected)
}
