//! The retrieval handle: owns the loaded stores and the embedding provider.
//!
//! Several handles, in one process or many, may share a data directory.
//! The Metadata Index is read fresh on every call, but chunk records and
//! vectors come from this handle's snapshot: chunks another handle appends
//! become searchable here after [`Retriever::reload`]. Writes serialize on
//! the database file lock, and a stale handle reloads before appending.

use std::{collections::HashSet, path::PathBuf};

use serde::Serialize;
use tracing::info;

use crate::{
    access::{self, Role},
    chunk_store::{ChunkStore, RebuildStats},
    data_dir::DataDir,
    doc_id::DocumentKey,
    embedding::{BatchEmbedder, EmbeddingProvider},
    error::Result,
    extract::Extraction,
    ingestion::{self, BatchReport, DocumentReport, Ingestor, PathOptions},
    metadata::{DocumentMetadata, MetadataIndex},
    search::{self, SearchParams, SearchResult},
    settings::Settings,
};

/// Counts describing the persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub dimension: Option<usize>,
    pub health: String,
    /// Chunks whose document is no longer in the Metadata Index.
    pub stale_chunks: usize,
}

pub struct Retriever {
    metadata: MetadataIndex,
    store: ChunkStore,
    provider: Box<dyn EmbeddingProvider>,
    settings: Settings,
}

impl Retriever {
    pub fn open(
        data_dir: &DataDir,
        provider: Box<dyn EmbeddingProvider>,
        settings: Settings,
    ) -> Result<Self> {
        let metadata = MetadataIndex::open(&data_dir.metadata_db())?;
        let store = ChunkStore::open(&data_dir.chunks_db())?;
        Ok(Self {
            metadata,
            store,
            provider,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn metadata(&self) -> &MetadataIndex {
        &self.metadata
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Re-read the chunk store from disk, picking up other handles' appends.
    pub fn reload(&mut self) -> Result<()> {
        self.store.reload()
    }

    fn ingestor(&mut self) -> Ingestor<'_> {
        let embedder = BatchEmbedder::new(self.provider.as_ref())
            .with_batch_size(self.settings.embed_batch_size)
            .with_pause(self.settings.batch_pause)
            .with_retry(self.settings.retry);
        Ingestor::new(&self.metadata, &mut self.store, embedder)
            .with_chunking(self.settings.chunking)
            .with_context_header(self.settings.context_header)
    }

    /// Ingest one already-chunked document.
    pub fn ingest_chunks(
        &mut self,
        meta: DocumentMetadata,
        chunks: Vec<String>,
    ) -> DocumentReport {
        self.ingestor().ingest_chunks(meta, chunks)
    }

    /// Chunk and ingest one document's extracted text.
    pub fn ingest_text(
        &mut self,
        meta: DocumentMetadata,
        extraction: Extraction,
    ) -> DocumentReport {
        self.ingestor().ingest_text(meta, extraction)
    }

    pub fn ingest_paths(
        &mut self,
        paths: &[PathBuf],
        options: &PathOptions,
    ) -> Result<BatchReport> {
        ingestion::ingest_paths(&mut self.ingestor(), paths, options)
    }

    /// Search under `role`. `top_k` defaults to the configured value.
    pub fn search(
        &self,
        query: &str,
        role: Role,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let params = SearchParams {
            top_k: top_k.unwrap_or(self.settings.top_k),
            oversample_factor: self.settings.oversample_factor,
        };
        search::execute_search(
            &self.metadata,
            &self.store,
            self.provider.as_ref(),
            &self.settings.retry,
            query,
            role,
            &params,
        )
    }

    pub fn accessible_documents(
        &self,
        role: Role,
    ) -> Result<HashSet<DocumentKey>> {
        access::accessible_documents(&self.metadata, role)
    }

    pub fn library(
        &self,
        role: Role,
        filter: Option<&str>,
    ) -> Result<Vec<(DocumentKey, DocumentMetadata)>> {
        access::library(&self.metadata, role, filter)
    }

    /// Remove a document from the Metadata Index.
    ///
    /// Its chunks stay in the store, invisible to every role, until the
    /// next [`Retriever::rebuild`].
    pub fn remove_document(&self, key: &DocumentKey) -> Result<bool> {
        let removed = self.metadata.remove(key)?;
        if removed {
            info!(document = %key, "removed document; chunks remain until rebuild");
        }
        Ok(removed)
    }

    /// Remove a document named either by its key or by its file name.
    ///
    /// The argument is tried as a key first, then reduced to a key the way
    /// ingestion derives one. Returns the key that was removed.
    pub fn remove_by_name(&self, name: &str) -> Result<Option<DocumentKey>> {
        let name = name.trim();
        let exact = DocumentKey::new(name);
        if self.remove_document(&exact)? {
            return Ok(Some(exact));
        }
        match DocumentKey::from_file_name(name) {
            Some(derived) if derived != exact => {
                Ok(self.remove_document(&derived)?.then_some(derived))
            }
            _ => Ok(None),
        }
    }

    /// Compact the store down to chunks of documents still indexed.
    pub fn rebuild(&mut self) -> Result<RebuildStats> {
        let live: HashSet<DocumentKey> =
            self.metadata.all()?.into_keys().collect();
        info!(documents = live.len(), "rebuilding chunk store");
        self.store.rebuild(|doc| live.contains(doc))
    }

    pub fn status(&self) -> Result<Status> {
        let live = self.metadata.all()?;
        let (chunks, vectors) = self.store.table_counts()?;
        Ok(Status {
            documents: live.len(),
            chunks,
            vectors,
            dimension: self.store.dimension(),
            health: self.store.health().to_string(),
            stale_chunks: self.store.stale_count(|doc| live.contains_key(doc)),
        })
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("provider", &self.provider.name())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
