//! Route modules for the attachment server

pub mod attachments;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router(state.clone()))
        .nest("/attachments", attachments::router(state))
}
