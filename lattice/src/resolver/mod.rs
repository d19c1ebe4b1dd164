//! Component resolution and the stores it reads through

pub mod component;
pub mod secret_store;
pub mod template_store;

pub use component::{ComponentResolver, ResolverOptions, DEPTH_INFINITE};
pub use secret_store::{secret_name, ObjectSecretStore, SecretStore};
pub use template_store::{ObjectTemplateStore, TemplateSource, TemplateStore};
