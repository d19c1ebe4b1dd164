//! Container build execution

pub mod builder;
pub mod docker;
pub mod executor;
pub mod logs;

pub use builder::{FakeImageBuilder, ImageBuilder};
pub use docker::{DockerCliBuilder, DockerCliOptions, RegistryLogin};
pub use executor::ContainerBuildExecutor;
pub use logs::BuildLogs;
