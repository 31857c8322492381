use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod revoker;
pub mod store;
pub mod sweeper;
pub mod token;

pub fn public_router() -> Router<AppState> {
    handlers::public_routes()
}

pub fn admin_router() -> Router<AppState> {
    handlers::admin_routes()
}
