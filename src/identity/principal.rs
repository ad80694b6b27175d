use std::fmt;

use serde::{Deserialize, Serialize};

/// An authenticated identity. Equality and hashing go by name only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal {
    name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }

    pub fn name(&self) -> &str { &self.name }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.name) }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self { Principal::new(s) }
}

impl From<String> for Principal {
    fn from(s: String) -> Self { Principal::new(s) }
}
