use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one artifact: a crate name and one of its versions.
///
/// Used as the cache key, the single-flight key and the metadata row key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    name: String,
    version: String,
}

impl ArtifactKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_at_separator() {
        let key = ArtifactKey::new("serde", "1.0.210");
        assert_eq!(key.to_string(), "serde@1.0.210");
        assert_eq!(key.name(), "serde");
        assert_eq!(key.version(), "1.0.210");
    }
}
