//! `config.redb`: raw persisted settings, keyed by name.
//!
//! Values are stored as entered. Parsing and validation live in
//! [`crate::settings`].

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    Table,
    TableDefinition,
};

use crate::{data_dir::open_database, error::Result};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub struct ConfigDb {
    path: PathBuf,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let config = Self {
            path: path.to_path_buf(),
        };
        config.write(|_| Ok(()))?;
        Ok(config)
    }

    fn db(&self) -> Result<Database> {
        open_database(&self.path)
    }

    /// Run `f` against the settings table inside one committed transaction.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static str, &'static str>) -> Result<T>,
    ) -> Result<T> {
        let db = self.db()?;
        let txn = db.begin_write()?;
        let out = {
            let mut table = txn.open_table(SETTINGS)?;
            f(&mut table)?
        };
        txn.commit()?;
        Ok(out)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write(|table| {
            table.insert(key, value)?;
            Ok(())
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_owned()))
    }

    /// Returns whether the key was present.
    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        self.write(|table| Ok(table.remove(key)?.is_some()))
    }

    /// Every persisted setting, ordered by key.
    pub fn list_settings(&self) -> Result<BTreeMap<String, String>> {
        let db = self.db()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        table
            .iter()?
            .map(|entry| -> Result<(String, String)> {
                let (k, v) = entry?;
                Ok((k.value().to_owned(), v.value().to_owned()))
            })
            .collect()
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}
