//! Small helpers shared across the daemon

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::LatticeError;

/// Build metadata reported by `--version` and `/version`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub fn version_info() -> VersionInfo {
    let stamp = |value: Option<&str>| value.unwrap_or("unknown").to_string();
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: stamp(option_env!("GIT_HASH")),
        build_time: stamp(option_env!("BUILD_TIME")),
    }
}

/// Exponential backoff between retries of a failing key
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt`, counting from zero
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let delay = self.base_delay.mul_f64(factor.min(u32::MAX as f64));
        delay.min(self.max_delay)
    }
}

pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lowercase hex SHA-1, used for object names and label values
pub fn sha1_hex(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    hex::encode(Sha1::digest(data))
}

/// Lowercase hex SHA-256, used for on-disk cache directories
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

/// SHA-1 of the JSON encoding of a value.
///
/// Maps are `BTreeMap`s throughout the model so field and key order is stable.
pub fn json_sha1<T: Serialize>(value: &T) -> Result<String, LatticeError> {
    let data = serde_json::to_vec(value)?;
    Ok(sha1_hex(&data))
}
