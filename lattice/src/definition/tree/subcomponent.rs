//! Named subcomponents attached to a tree node

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::definition::tree::path::Path;
use crate::errors::LatticeError;

/// Separator between the path and the subcomponent name
pub const SUBCOMPONENT_SEPARATOR: char = ':';

/// A path plus the name of something attached to that node, e.g. `/a/b:db-password`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathSubcomponent {
    path: Path,
    name: String,
}

impl PathSubcomponent {
    /// Parse a `path:name` string
    pub fn parse(value: &str) -> Result<Self, LatticeError> {
        let parts: Vec<&str> = value.split(SUBCOMPONENT_SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(LatticeError::InvalidSubcomponent(format!(
                "improperly formatted path subcomponent: {}",
                value
            )));
        }

        let path = Path::new(parts[0])?;
        Self::from_parts(path, parts[1])
    }

    pub fn from_parts(path: Path, name: &str) -> Result<Self, LatticeError> {
        if name.is_empty() {
            return Err(LatticeError::InvalidSubcomponent(
                "cannot pass empty string as subcomponent".to_string(),
            ));
        }

        Ok(Self {
            path,
            name: name.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Domain form used in label values, e.g. `/a/b:foo` becomes `foo.b.a`
    pub fn to_domain(&self) -> String {
        if self.path.is_root() {
            self.name.to_lowercase()
        } else {
            format!("{}.{}", self.name.to_lowercase(), self.path.to_domain())
        }
    }
}

impl fmt::Display for PathSubcomponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.path, SUBCOMPONENT_SEPARATOR, self.name)
    }
}

impl FromStr for PathSubcomponent {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PathSubcomponent {
    type Error = LatticeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathSubcomponent> for String {
    fn from(value: PathSubcomponent) -> Self {
        value.to_string()
    }
}
