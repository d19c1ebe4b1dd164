//! Lattice Library
//!
//! Resolves system definitions from git, builds their containers and rolls them out through
//! controllers reconciling an in-memory object store.

pub mod api;
pub mod app;
pub mod backend;
pub mod containerbuild;
pub mod controller;
pub mod definition;
pub mod envoy;
pub mod errors;
pub mod filesys;
pub mod git;
pub mod http;
pub mod logs;
pub mod resolver;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
