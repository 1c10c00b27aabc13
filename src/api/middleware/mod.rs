pub mod auth;
pub mod cors;

pub use auth::{require_admin, AdminAuth};
pub use cors::cors_layer;
