//! HTTP API

pub mod errors;
pub mod handlers;
pub mod models;
pub mod serve;
pub mod state;

pub use serve::{router, serve};
pub use state::ServerState;
