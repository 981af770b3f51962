use std::path::Path;

use serde::{Deserialize, Serialize};

/// The normalized identifier of an ingested document.
///
/// Derived from the original file name: directory components and the last
/// extension are stripped, case is preserved. `"reports/Policy_2024.pdf"`
/// and `"Policy_2024.txt"` both map to `Policy_2024`, which is how an
/// original and its extracted-text twin are matched.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Derive the key from a file name or path. Returns `None` when nothing
    /// is left after stripping.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = Path::new(file_name.trim()).file_stem()?.to_str()?;
        if stem.is_empty() {
            None
        } else {
            Some(Self(stem.to_string()))
        }
    }

    /// Wrap an already-normalized key without stripping anything.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for DocumentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
