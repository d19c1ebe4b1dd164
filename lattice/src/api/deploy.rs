//! Deploy objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::tree::Path;
use crate::store::meta::ObjectMeta;

/// Deploy lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeployState {
    #[default]
    Pending,
    Accepted,
    InProgress,
    Succeeded,
    Failed,
}

impl DeployState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Succeeded | DeployState::Failed)
    }
}

/// Exactly one of `build`, `path` or `version` must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployStatus {
    #[serde(default)]
    pub state: DeployState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deploy {
    pub metadata: ObjectMeta,

    pub spec: DeploySpec,

    #[serde(default)]
    pub status: DeployStatus,
}

crate::impl_object!(Deploy, "Deploy", DeploySpec, DeployStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_wire_name() {
        let json = serde_json::to_string(&DeployState::InProgress).unwrap();
        assert_eq!(json, "\"inProgress\"");
    }
}
