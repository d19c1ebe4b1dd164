//! Daemon level tests: controllers, backend and HTTP API wired together

mod common;
mod test_api;
mod test_builds;
mod test_deploys;
