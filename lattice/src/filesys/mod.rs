//! Filesystem helpers

pub mod dir;
pub mod file;

pub use dir::{Dir, ScratchDir};
pub use file::File;
