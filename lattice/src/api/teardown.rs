//! Teardown objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::meta::ObjectMeta;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TeardownState {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl TeardownState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TeardownState::Succeeded | TeardownState::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownSpec {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownStatus {
    #[serde(default)]
    pub state: TeardownState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teardown {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TeardownSpec,

    #[serde(default)]
    pub status: TeardownStatus,
}

crate::impl_object!(Teardown, "Teardown", TeardownSpec, TeardownStatus);
