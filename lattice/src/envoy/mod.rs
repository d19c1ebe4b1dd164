//! Envoy sidecar support

pub mod bootstrap;

pub use bootstrap::BootstrapEnv;
