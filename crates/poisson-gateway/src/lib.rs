//! Poisson Gateway - the control-plane HTTP surface

pub mod auth;
pub mod server;

pub use auth::GatewayAuth;
pub use server::{router, start_gateway, AppState, GatewayConfig};
