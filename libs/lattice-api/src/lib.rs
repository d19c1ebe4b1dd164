//! Lattice API models
//!
//! Request and response bodies of the v1 HTTP API, shared by the server and its clients.

pub mod models;

pub use models::*;
