//! Cached template bodies and their git index

use serde::{Deserialize, Serialize};

use crate::api::NoStatus;
use crate::definition::component::Component;
use crate::store::meta::ObjectMeta;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub component: Component,
}

/// Parsed template body, named by the SHA-1 of its canonical JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub metadata: ObjectMeta,

    pub spec: TemplateSpec,

    #[serde(default)]
    pub status: NoStatus,
}

crate::impl_object!(Template, "Template", TemplateSpec, NoStatus);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitTemplateSpec {
    pub url: String,

    pub commit: String,

    pub file: String,

    /// Name of the Template holding the body
    pub template_digest: String,
}

/// Index entry mapping `(url, commit, file)` to a template digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitTemplate {
    pub metadata: ObjectMeta,

    pub spec: GitTemplateSpec,

    #[serde(default)]
    pub status: NoStatus,
}

crate::impl_object!(GitTemplate, "GitTemplate", GitTemplateSpec, NoStatus);
