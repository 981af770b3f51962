//! The Metadata Index: document key → descriptive attributes.
//!
//! This is the source of truth for access control. Entries are stored as
//! JSON in `metadata.redb`; every write commits before returning.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    access::Team,
    data_dir::open_database,
    doc_id::DocumentKey,
    error::{Error, Result},
};

const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");

/// Placeholder titles that extraction tools write when a field is missing.
const PLACEHOLDER_TITLES: &[&str] = &["", "N/A", "Extraction Error"];

/// Descriptive attributes of one ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Original file name including its extension.
    pub file_name: String,
    /// Location of the original upload.
    #[serde(default)]
    pub file_path: String,
    /// Location of the extracted-text twin, if one was written.
    #[serde(default)]
    pub text_path: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub team: Team,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Last modification time, seconds since the Unix epoch.
    #[serde(default)]
    pub modified: Option<u64>,
    /// Creation time, seconds since the Unix epoch.
    #[serde(default)]
    pub created: Option<u64>,
}

impl DocumentMetadata {
    /// Metadata with only a file name set and everything else defaulted.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: String::new(),
            text_path: None,
            title: None,
            author: None,
            subject: None,
            team: Team::Unassigned,
            tags: Vec::new(),
            category: None,
            size_bytes: None,
            modified: None,
            created: None,
        }
    }

    pub fn key(&self) -> Option<DocumentKey> {
        DocumentKey::from_file_name(&self.file_name)
    }

    /// The extracted title, unless it is missing or a placeholder.
    pub fn extracted_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !PLACEHOLDER_TITLES.contains(title))
    }

    /// The title if one was extracted, otherwise the document key.
    pub fn display_title(&self) -> String {
        match self.extracted_title() {
            Some(title) => title.to_string(),
            None => self
                .key()
                .map(|k| k.to_string())
                .unwrap_or_else(|| self.file_name.clone()),
        }
    }
}

/// Handle on `metadata.redb`. The database is opened per call, so other
/// handles on the same file see every committed change immediately.
pub struct MetadataIndex {
    path: PathBuf,
}

impl MetadataIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let db = open_database(path)?;

        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn db(&self) -> Result<Database> {
        open_database(&self.path)
    }

    /// Insert or wholesale replace the entry for the metadata's key.
    pub fn upsert(&self, metadata: &DocumentMetadata) -> Result<DocumentKey> {
        let key = metadata.key().ok_or_else(|| {
            Error::InvalidDocument(format!(
                "cannot derive a document key from file name {:?}",
                metadata.file_name
            ))
        })?;
        let bytes = serde_json::to_vec(metadata)?;

        let db = self.db()?;
        let txn = db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(key)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&self, key: &DocumentKey) -> Result<bool> {
        let db = self.db()?;
        let txn = db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.remove(key.as_str())?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Look up one entry. An undecodable entry reads as absent.
    pub fn get(&self, key: &DocumentKey) -> Result<Option<DocumentMetadata>> {
        let db = self.db()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        Ok(table
            .get(key.as_str())?
            .and_then(|v| decode(key.as_str(), v.value())))
    }

    /// Every decodable entry, ordered by key.
    pub fn all(&self) -> Result<BTreeMap<DocumentKey, DocumentMetadata>> {
        let db = self.db()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = BTreeMap::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            if let Some(meta) = decode(k.value(), v.value()) {
                result.insert(DocumentKey::new(k.value()), meta);
            }
        }
        Ok(result)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn decode(key: &str, bytes: &[u8]) -> Option<DocumentMetadata> {
    match serde_json::from_slice(bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(key, "skipping undecodable metadata entry: {e}");
            None
        }
    }
}

impl std::fmt::Debug for MetadataIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataIndex")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index() -> (tempfile::TempDir, MetadataIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            MetadataIndex::open(&tmp.path().join("metadata.redb")).unwrap();
        (tmp, index)
    }

    fn policy() -> DocumentMetadata {
        let mut meta = DocumentMetadata::new("Policy_2024.pdf");
        meta.title = Some("Credit Policy".to_string());
        meta.team = Team::RiskTribe;
        meta.tags = vec!["credit".to_string(), "2024".to_string()];
        meta
    }

    #[test]
    fn upsert_and_get() {
        let (_tmp, index) = test_index();

        let key = index.upsert(&policy()).unwrap();
        assert_eq!(key.as_str(), "Policy_2024");
        assert_eq!(index.get(&key).unwrap(), Some(policy()));
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn upsert_replaces_wholesale() {
        let (_tmp, index) = test_index();
        index.upsert(&policy()).unwrap();

        let replacement = DocumentMetadata::new("Policy_2024.docx");
        let key = index.upsert(&replacement).unwrap();

        let stored = index.get(&key).unwrap().unwrap();
        assert_eq!(stored, replacement);
        assert!(stored.tags.is_empty());
        assert_eq!(stored.team, Team::Unassigned);
    }

    #[test]
    fn upsert_rejects_empty_key() {
        let (_tmp, index) = test_index();
        let err = index.upsert(&DocumentMetadata::new("  ")).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn remove_is_idempotent() {
        let (_tmp, index) = test_index();
        let key = index.upsert(&policy()).unwrap();

        assert!(index.remove(&key).unwrap());
        assert!(!index.remove(&key).unwrap());
        assert_eq!(index.get(&key).unwrap(), None);
    }

    #[test]
    fn missing_optional_attributes_default() {
        let meta: DocumentMetadata =
            serde_json::from_str(r#"{"file_name": "Guide_Intro.pdf"}"#)
                .unwrap();
        assert_eq!(meta.team, Team::Unassigned);
        assert!(meta.tags.is_empty());
        assert_eq!(meta.display_title(), "Guide_Intro");
    }

    #[test]
    fn placeholder_titles_fall_back_to_key() {
        let mut meta = DocumentMetadata::new("Guide_Intro.pdf");
        meta.title = Some("N/A".to_string());
        assert_eq!(meta.display_title(), "Guide_Intro");
        meta.title = Some("Onboarding Guide".to_string());
        assert_eq!(meta.display_title(), "Onboarding Guide");
    }

    #[test]
    fn undecodable_entry_is_skipped() {
        let (_tmp, index) = test_index();
        index.upsert(&policy()).unwrap();

        {
            let db = index.db().unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(DOCUMENTS).unwrap();
                table.insert("Broken", b"{not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let all = index.all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("Policy_2024"));
        assert_eq!(index.get(&DocumentKey::new("Broken")).unwrap(), None);
    }

    #[test]
    fn handles_on_one_file_share_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.redb");
        let first = MetadataIndex::open(&path).unwrap();
        let second = MetadataIndex::open(&path).unwrap();

        first.upsert(&policy()).unwrap();
        assert!(second.get(&DocumentKey::new("Policy_2024")).unwrap().is_some());

        assert!(second.remove(&DocumentKey::new("Policy_2024")).unwrap());
        assert!(first.is_empty().unwrap());
    }

    #[test]
    fn corrupt_file_reads_as_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.redb");
        std::fs::write(&path, b"definitely not a database".repeat(400))
            .unwrap();

        let index = MetadataIndex::open(&path).unwrap();
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.redb");
        {
            let index = MetadataIndex::open(&path).unwrap();
            index.upsert(&policy()).unwrap();
        }
        let index = MetadataIndex::open(&path).unwrap();
        assert_eq!(
            index.get(&DocumentKey::new("Policy_2024")).unwrap(),
            Some(policy())
        );
    }
}
