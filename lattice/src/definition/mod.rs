//! System definitions: paths, components and resolved trees

pub mod component;
pub mod resolution;
pub mod tree;
