use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use backon::{BlockingRetryable, ExponentialBuilder};
use redb::{Database, DatabaseError};
use tracing::{debug, error};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The ROLERAG_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/rolerag/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("ROLERAG_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("rolerag")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    pub fn metadata_db(&self) -> PathBuf {
        self.root.join("metadata.redb")
    }

    pub fn chunks_db(&self) -> PathBuf {
        self.root.join("chunks.redb")
    }
}

/// Open (or create) a redb database, moving an unreadable file aside.
///
/// Handles are short-lived: callers open a database for one operation and
/// drop it afterwards, so the file lock is only held while work is done.
/// While another handle holds the lock, opening waits with backoff for up to
/// about ten seconds before giving up with `DatabaseAlreadyOpen`.
///
/// A file redb refuses to open for any other reason is renamed to
/// `<name>.corrupt` and replaced by a fresh, empty database.
pub(crate) fn open_database(path: &Path) -> Result<Database> {
    match create_waiting(path) {
        Ok(db) => Ok(db),
        Err(DatabaseError::DatabaseAlreadyOpen) => {
            Err(DatabaseError::DatabaseAlreadyOpen.into())
        }
        Err(e) if path.is_file() => {
            let quarantine = quarantine_path(path);
            error!(
                path = %path.display(),
                moved_to = %quarantine.display(),
                "unreadable database, starting empty: {e}"
            );
            std::fs::rename(path, &quarantine)?;
            Ok(Database::create(path)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn create_waiting(path: &Path) -> std::result::Result<Database, DatabaseError> {
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(250))
        .with_max_times(45);

    (|| Database::create(path))
        .retry(backoff)
        .sleep(std::thread::sleep)
        .when(|e| matches!(e, DatabaseError::DatabaseAlreadyOpen))
        .notify(|_, delay: Duration| {
            debug!(
                path = %path.display(),
                delay_ms = delay.as_millis() as u64,
                "database locked by another handle, waiting"
            );
        })
        .call()
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}
