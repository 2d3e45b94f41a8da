mod admin;
mod health_check;
mod project;
mod task;
mod user;

use std::sync::Arc;

use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub fn get_router(app_state: AppState) -> axum::Router {
    // Handlers share the state through an Arc, nothing inside it is cloned.
    let app_state = Arc::new(app_state);

    axum::Router::new()
        .route("/health", get(health_check::health_check))
        .nest("/api/v1/user", user::router(app_state.clone()))
        .nest("/api/v1/admin", admin::router(app_state.clone()))
        .nest("/api/v1/project", project::router(app_state.clone()))
        .nest("/api/v1/task", task::router(app_state.clone()))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
