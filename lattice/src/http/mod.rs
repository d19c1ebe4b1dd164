//! Client of the v1 HTTP API

pub mod builds;
pub mod client;
pub mod deploys;
pub mod secrets;
pub mod services;
pub mod systems;

pub use client::ApiClient;
