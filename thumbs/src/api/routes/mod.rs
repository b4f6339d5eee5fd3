//! Route tables.

pub mod health;
pub mod vi;

use axum::Router;

use crate::api::server::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(vi::router())
        .with_state(state)
}
