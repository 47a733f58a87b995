pub mod action_token;
mod cleanup_routes;
pub mod config;
mod gone_routes;
mod http_layers;
mod jobs_routes;
pub mod metrics;
pub mod server;
pub mod state;

pub use action_token::ActionTokens;
pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use state::ServerState;
