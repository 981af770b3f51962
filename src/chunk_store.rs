//! The Chunk/Vector Store: chunk records and their embeddings, kept
//! positionally aligned with the in-memory [`FlatIndex`].
//!
//! Both halves live in `chunks.redb`. Record text goes in `chunks`, vectors
//! in `vectors`, and both are keyed by the same dense position. Every
//! append writes the two tables in one write transaction, so a reader never
//! observes one without the other. The in-memory snapshot (records plus
//! index) is only extended after the transaction commits.
//!
//! The database is opened per operation, so several handles may share one
//! file. A handle's snapshot only changes on [`ChunkStore::reload`] or on
//! its own writes. Before writing, a handle whose snapshot no longer matches
//! the persisted tables reloads first, so positions are never reused.
//!
//! Binary format of a `vectors` entry: `D` packed `f32` values, where `D`
//! is the dimension recorded in `store_info`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    data_dir::open_database,
    doc_id::DocumentKey,
    error::{Error, Result},
    flat_index::{FlatIndex, Neighbor},
};

const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const STORE_INFO: TableDefinition<&str, u64> =
    TableDefinition::new("store_info");

const DIMENSION_KEY: &str = "dimension";

/// A chunk about to be appended, together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub document: DocumentKey,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// The persisted, text half of a chunk record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub document: DocumentKey,
    pub text: String,
}

/// Integrity of the store as found on the last load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    /// The record and vector tables do not cover the same positions.
    Misaligned { records: usize, vectors: usize },
    /// Entries exist that cannot be decoded.
    Corrupt(String),
}

impl std::fmt::Display for StoreHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreHealth::Healthy => f.write_str("healthy"),
            StoreHealth::Misaligned { records, vectors } => write!(
                f,
                "misaligned ({records} records, {vectors} vectors)"
            ),
            StoreHealth::Corrupt(reason) => write!(f, "corrupt ({reason})"),
        }
    }
}

/// Counts reported by [`ChunkStore::rebuild`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub kept: usize,
    pub dropped: usize,
}

pub struct ChunkStore {
    path: PathBuf,
    records: Vec<StoredChunk>,
    index: FlatIndex,
    health: StoreHealth,
}

impl ChunkStore {
    /// Open or create the store and load its snapshot.
    pub fn open(path: &Path) -> Result<Self> {
        let db = open_database(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(STORE_INFO)?;
        txn.commit()?;

        let mut store = Self {
            path: path.to_path_buf(),
            records: Vec::new(),
            index: FlatIndex::new(),
            health: StoreHealth::Healthy,
        };
        store.reload_from(&db)?;
        Ok(store)
    }

    fn db(&self) -> Result<Database> {
        open_database(&self.path)
    }

    /// Re-read the persisted tables and replace the in-memory snapshot,
    /// picking up whatever other handles have committed.
    pub fn reload(&mut self) -> Result<()> {
        let db = self.db()?;
        self.reload_from(&db)
    }

    fn reload_from(&mut self, db: &Database) -> Result<()> {
        let raw = RawTables::read(db)?;
        let (records, index, health) = raw.into_snapshot();

        match &health {
            StoreHealth::Healthy => {
                debug!(records = records.len(), "loaded chunk store");
            }
            StoreHealth::Misaligned { records, vectors } => {
                error!(records, vectors, "chunk store is misaligned");
            }
            StoreHealth::Corrupt(reason) => {
                error!("chunk store is corrupt, serving no results: {reason}");
            }
        }

        self.records = records;
        self.index = index;
        self.health = health;
        Ok(())
    }

    pub fn health(&self) -> &StoreHealth {
        &self.health
    }

    /// Number of records in the loaded snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of vectors in the loaded ANN index.
    pub fn vector_count(&self) -> usize {
        self.index.len()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    /// Entry counts of the persisted tables, regardless of health.
    pub fn table_counts(&self) -> Result<(usize, usize)> {
        table_counts(&self.db()?)
    }

    pub fn record(&self, position: usize) -> Option<&StoredChunk> {
        self.records.get(position)
    }

    pub fn records(&self) -> impl Iterator<Item = &StoredChunk> {
        self.records.iter()
    }

    /// Append records and their embeddings as one atomic unit.
    ///
    /// Positions continue from the persisted length, in input order. A
    /// stale snapshot is reloaded first. A batch whose dimension disagrees
    /// with the store fails with [`Error::DimensionMismatch`] and nothing is
    /// written.
    pub fn append(&mut self, batch: Vec<ChunkRecord>) -> Result<()> {
        let db = self.db()?;
        if table_counts(&db)? != (self.records.len(), self.index.len()) {
            info!("chunk store changed on disk, reloading before append");
            self.reload_from(&db)?;
        }
        self.ensure_writable()?;
        if batch.is_empty() {
            return Ok(());
        }

        let dimension = self
            .index
            .check_batch(batch.iter().map(|r| r.embedding.as_slice()))?
            .ok_or_else(|| Error::Embedding("empty embedding batch".into()))?;

        let start = self.records.len() as u64;
        let mut records = Vec::with_capacity(batch.len());
        let mut vectors = Vec::with_capacity(batch.len());
        for r in batch {
            records.push(StoredChunk {
                document: r.document,
                text: r.text,
            });
            vectors.push(r.embedding);
        }

        let txn = db.begin_write()?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut vector_table = txn.open_table(VECTORS)?;
            let mut info = txn.open_table(STORE_INFO)?;

            for (offset, (record, vector)) in
                records.iter().zip(&vectors).enumerate()
            {
                let position = start + offset as u64;
                let json = serde_json::to_vec(record)?;
                chunks.insert(position, json.as_slice())?;
                vector_table.insert(
                    position,
                    bytemuck::cast_slice::<f32, u8>(vector),
                )?;
            }
            info.insert(DIMENSION_KEY, dimension as u64)?;
        }
        txn.commit()?;

        self.index.add_batch(&vectors)?;
        self.records.extend(records);
        debug!(
            appended = vectors.len(),
            total = self.records.len(),
            "appended chunk records"
        );
        Ok(())
    }

    /// Nearest records to `query`, ascending by distance.
    ///
    /// A misaligned store refuses to search. A corrupt store answers with
    /// nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        match &self.health {
            StoreHealth::Healthy => {}
            StoreHealth::Misaligned { records, vectors } => {
                return Err(Error::AlignmentViolation {
                    records: *records,
                    vectors: *vectors,
                });
            }
            StoreHealth::Corrupt(reason) => {
                warn!("search against corrupt chunk store: {reason}");
                return Ok(Vec::new());
            }
        }
        if self.records.len() != self.index.len() {
            return Err(Error::AlignmentViolation {
                records: self.records.len(),
                vectors: self.index.len(),
            });
        }
        self.index.search(query, k)
    }

    /// Records whose document fails `is_live`.
    pub fn stale_count(&self, is_live: impl Fn(&DocumentKey) -> bool) -> usize {
        self.records.iter().filter(|r| !is_live(&r.document)).count()
    }

    /// Compact the store from its persisted tables.
    ///
    /// Keeps records that have a decodable vector at the same position, a
    /// vector of the store's dimension, and a document accepted by `keep`.
    /// Survivors are renumbered densely in their original order inside one
    /// write transaction. Vectors are reused, nothing is re-embedded.
    pub fn rebuild(
        &mut self,
        keep: impl Fn(&DocumentKey) -> bool,
    ) -> Result<RebuildStats> {
        let db = self.db()?;
        let raw = RawTables::read(&db)?;
        let total = raw.positions();

        let mut dimension = raw.dimension;
        let mut survivors: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (position, chunk_bytes) in &raw.chunks {
            let Some(vector_bytes) = raw.vectors.get(position) else {
                continue;
            };
            let Ok(record) = serde_json::from_slice::<StoredChunk>(chunk_bytes)
            else {
                warn!(position, "dropping undecodable chunk record");
                continue;
            };
            let Some(vector) = decode_vector(vector_bytes) else {
                warn!(position, "dropping undecodable vector");
                continue;
            };
            match dimension {
                Some(d) if d != vector.len() => {
                    warn!(
                        position,
                        expected = d,
                        actual = vector.len(),
                        "dropping vector of wrong dimension"
                    );
                    continue;
                }
                Some(_) => {}
                None => dimension = Some(vector.len()),
            }
            if !keep(&record.document) {
                continue;
            }
            survivors.push((chunk_bytes.clone(), vector_bytes.clone()));
        }

        let txn = db.begin_write()?;
        txn.delete_table(CHUNKS)?;
        txn.delete_table(VECTORS)?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut vectors = txn.open_table(VECTORS)?;
            let mut info = txn.open_table(STORE_INFO)?;
            for (position, (chunk_bytes, vector_bytes)) in
                survivors.iter().enumerate()
            {
                chunks.insert(position as u64, chunk_bytes.as_slice())?;
                vectors.insert(position as u64, vector_bytes.as_slice())?;
            }
            match dimension {
                Some(d) if !survivors.is_empty() => {
                    info.insert(DIMENSION_KEY, d as u64)?;
                }
                _ => {
                    info.remove(DIMENSION_KEY)?;
                }
            }
        }
        txn.commit()?;

        let stats = RebuildStats {
            kept: survivors.len(),
            dropped: total - survivors.len(),
        };
        info!(kept = stats.kept, dropped = stats.dropped, "rebuilt chunk store");

        self.reload_from(&db)?;
        Ok(stats)
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.health {
            StoreHealth::Healthy => Ok(()),
            StoreHealth::Misaligned { records, vectors } => {
                Err(Error::AlignmentViolation {
                    records: *records,
                    vectors: *vectors,
                })
            }
            StoreHealth::Corrupt(reason) => {
                Err(Error::CorruptState(reason.clone()))
            }
        }
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("records", &self.records.len())
            .field("dimension", &self.index.dimension())
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

/// Undecoded contents of the three tables.
struct RawTables {
    chunks: BTreeMap<u64, Vec<u8>>,
    vectors: BTreeMap<u64, Vec<u8>>,
    dimension: Option<usize>,
}

impl RawTables {
    fn read(db: &Database) -> Result<Self> {
        let txn = db.begin_read()?;

        let mut chunks = BTreeMap::new();
        for entry in txn.open_table(CHUNKS)?.iter()? {
            let (k, v) = entry?;
            chunks.insert(k.value(), v.value().to_vec());
        }

        let mut vectors = BTreeMap::new();
        for entry in txn.open_table(VECTORS)?.iter()? {
            let (k, v) = entry?;
            vectors.insert(k.value(), v.value().to_vec());
        }

        let dimension = txn
            .open_table(STORE_INFO)?
            .get(DIMENSION_KEY)?
            .map(|v| v.value() as usize);

        Ok(Self {
            chunks,
            vectors,
            dimension,
        })
    }

    /// Distinct positions present in either table.
    fn positions(&self) -> usize {
        self.chunks.len()
            + self
                .vectors
                .keys()
                .filter(|k| !self.chunks.contains_key(k))
                .count()
    }

    fn into_snapshot(self) -> (Vec<StoredChunk>, FlatIndex, StoreHealth) {
        let empty = || (Vec::new(), FlatIndex::new());
        let records_len = self.chunks.len();
        let vectors_len = self.vectors.len();

        if records_len != vectors_len
            || !is_dense(&self.chunks)
            || !is_dense(&self.vectors)
        {
            let (records, index) = empty();
            return (
                records,
                index,
                StoreHealth::Misaligned {
                    records: records_len,
                    vectors: vectors_len,
                },
            );
        }

        let mut records = Vec::with_capacity(records_len);
        for (position, bytes) in &self.chunks {
            match serde_json::from_slice::<StoredChunk>(bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let (records, index) = empty();
                    return (
                        records,
                        index,
                        StoreHealth::Corrupt(format!(
                            "chunk record {position}: {e}"
                        )),
                    );
                }
            }
        }

        let mut vectors = Vec::with_capacity(vectors_len);
        for (position, bytes) in &self.vectors {
            let decoded = decode_vector(bytes).filter(|v| {
                self.dimension.is_none_or(|d| d == v.len())
            });
            match decoded {
                Some(vector) => vectors.push(vector),
                None => {
                    let (records, index) = empty();
                    return (
                        records,
                        index,
                        StoreHealth::Corrupt(format!(
                            "vector {position} has {} bytes",
                            bytes.len()
                        )),
                    );
                }
            }
        }

        let mut index = FlatIndex::new();
        if let Err(e) = index.add_batch(&vectors) {
            let (records, index) = empty();
            return (records, index, StoreHealth::Corrupt(e.to_string()));
        }
        (records, index, StoreHealth::Healthy)
    }
}

/// Entry counts of the `chunks` and `vectors` tables.
fn table_counts(db: &Database) -> Result<(usize, usize)> {
    let txn = db.begin_read()?;
    let chunks = txn.open_table(CHUNKS)?.len()? as usize;
    let vectors = txn.open_table(VECTORS)?.len()? as usize;
    Ok((chunks, vectors))
}

/// Whether keys are exactly `0..len`.
fn is_dense(table: &BTreeMap<u64, Vec<u8>>) -> bool {
    table.keys().enumerate().all(|(i, &k)| k == i as u64)
}

/// Unpack `f32`s from possibly unaligned bytes.
fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect(),
    )
}
