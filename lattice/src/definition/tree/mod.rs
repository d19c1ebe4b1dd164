//! Typed paths and the path-keyed tree

pub mod map;
pub mod path;
pub mod subcomponent;

pub use map::Tree;
pub use path::Path;
pub use subcomponent::PathSubcomponent;
