//! Incremental ingestion: new document → appended chunks, vectors and
//! metadata.
//!
//! A document moves through `received → chunked → embedded → appended →
//! indexed`. Nothing is written before the append, and the append itself is
//! atomic, so a document that fails earlier leaves no trace. Metadata is
//! upserted last; only then do the new chunks become visible to searches.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    access::Team,
    chunk_store::{ChunkRecord, ChunkStore},
    chunking::{ChunkingConfig, chunk_with},
    doc_id::DocumentKey,
    embedding::{BatchEmbedder, EmbeddingTask},
    error::Result,
    extract::{Extraction, extract_metadata, extract_text},
    metadata::{DocumentMetadata, MetadataIndex},
    walker::discover_documents,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Received,
    Chunked,
    Embedded,
    Appended,
    Indexed,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IngestStage::Received => "received",
            IngestStage::Chunked => "chunked",
            IngestStage::Embedded => "embedded",
            IngestStage::Appended => "appended",
            IngestStage::Indexed => "indexed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed { chunks: usize },
    /// Recorded in the Metadata Index, but nothing to search.
    NoContent { reason: String },
    /// `stage` is the step that did not complete.
    Failed { stage: IngestStage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReport {
    pub file_name: String,
    pub key: Option<DocumentKey>,
    pub outcome: IngestOutcome,
}

impl DocumentReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, IngestOutcome::Failed { .. })
    }
}

impl std::fmt::Display for DocumentReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            IngestOutcome::Indexed { chunks } => {
                write!(f, "{}: indexed {chunks} chunk(s)", self.file_name)
            }
            IngestOutcome::NoContent { reason } => {
                write!(f, "{}: no content ({reason})", self.file_name)
            }
            IngestOutcome::Failed { stage, reason } => {
                write!(f, "{}: failed at {stage}: {reason}", self.file_name)
            }
        }
    }
}

/// Per-document results of a multi-document run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
}

impl BatchReport {
    /// Documents that did not fail, including those with no content.
    pub fn processed(&self) -> usize {
        self.documents.len() - self.failed()
    }

    pub fn failed(&self) -> usize {
        self.documents.iter().filter(|d| d.is_failure()).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Finished processing. Successful: {}, Failed: {}.",
            self.processed(),
            self.failed()
        )
    }
}

/// Options applied to every file of an [`ingest_paths`] run.
#[derive(Debug, Clone, Default)]
pub struct PathOptions {
    pub team: Team,
    pub tags: Vec<String>,
    /// Directory holding processed `<stem>.txt` twins.
    pub text_dir: Option<PathBuf>,
}

/// Drives documents into the Chunk/Vector Store and Metadata Index.
pub struct Ingestor<'a> {
    metadata: &'a MetadataIndex,
    store: &'a mut ChunkStore,
    embedder: BatchEmbedder<'a>,
    chunking: ChunkingConfig,
    context_header: bool,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        metadata: &'a MetadataIndex,
        store: &'a mut ChunkStore,
        embedder: BatchEmbedder<'a>,
    ) -> Self {
        Self {
            metadata,
            store,
            embedder,
            chunking: ChunkingConfig::default(),
            context_header: true,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_context_header(mut self, enabled: bool) -> Self {
        self.context_header = enabled;
        self
    }

    /// Chunk extracted text, then ingest the chunks.
    pub fn ingest_text(
        &mut self,
        meta: DocumentMetadata,
        extraction: Extraction,
    ) -> DocumentReport {
        let text = match extraction {
            Extraction::Text(text) => text,
            Extraction::NoContent(reason) => {
                return self.record_without_chunks(meta, reason);
            }
        };

        match chunk_with(&text, &self.chunking) {
            Ok(chunks) => self.ingest_chunks(meta, chunks),
            Err(e) => failed(meta, IngestStage::Chunked, e.to_string()),
        }
    }

    /// Embed, append and index an already-chunked document.
    pub fn ingest_chunks(
        &mut self,
        meta: DocumentMetadata,
        chunks: Vec<String>,
    ) -> DocumentReport {
        let Some(key) = meta.key() else {
            return failed(
                meta,
                IngestStage::Received,
                "cannot derive a document key from the file name".into(),
            );
        };
        if chunks.is_empty() {
            return self
                .record_without_chunks(meta, "no text after chunking".into());
        }
        debug!(document = %key, chunks = chunks.len(), "chunked");

        let to_embed: Vec<String> = if self.context_header {
            let title = header_title(&meta, &key);
            chunks
                .iter()
                .map(|chunk| context_header(&title, chunk))
                .collect()
        } else {
            chunks.clone()
        };
        let embeddings =
            match self.embedder.embed_all(&to_embed, EmbeddingTask::Document) {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    return failed(meta, IngestStage::Embedded, e.to_string());
                }
            };
        debug!(document = %key, "embedded");

        let count = chunks.len();
        let records = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| ChunkRecord {
                document: key.clone(),
                text,
                embedding,
            })
            .collect();
        if let Err(e) = self.store.append(records) {
            return failed(meta, IngestStage::Appended, e.to_string());
        }
        debug!(document = %key, "appended");

        if let Err(e) = self.metadata.upsert(&meta) {
            error!(
                document = %key,
                "chunks appended but metadata not recorded; they stay hidden \
                 until re-ingested or rebuilt: {e}"
            );
            return failed(meta, IngestStage::Indexed, e.to_string());
        }
        info!(document = %key, chunks = count, "indexed");

        DocumentReport {
            file_name: meta.file_name,
            key: Some(key),
            outcome: IngestOutcome::Indexed { chunks: count },
        }
    }

    /// Upsert metadata for a document that contributes no chunks.
    fn record_without_chunks(
        &mut self,
        meta: DocumentMetadata,
        reason: String,
    ) -> DocumentReport {
        match self.metadata.upsert(&meta) {
            Ok(key) => {
                info!(document = %key, "no content: {reason}");
                DocumentReport {
                    file_name: meta.file_name,
                    key: Some(key),
                    outcome: IngestOutcome::NoContent { reason },
                }
            }
            Err(e) => failed(meta, IngestStage::Received, e.to_string()),
        }
    }
}

/// Title named in a chunk's context header. Without an extracted title the
/// key is used with underscores read as spaces.
fn header_title(meta: &DocumentMetadata, key: &DocumentKey) -> String {
    match meta.extracted_title() {
        Some(title) => title.to_string(),
        None => key.as_str().replace('_', " "),
    }
}

/// The text actually embedded for a chunk when context headers are on.
pub fn context_header(title: &str, chunk: &str) -> String {
    format!("Document: {title}\n\nContent: {chunk}")
}

fn failed(
    meta: DocumentMetadata,
    stage: IngestStage,
    reason: String,
) -> DocumentReport {
    warn!(file = %meta.file_name, %stage, "ingestion failed: {reason}");
    DocumentReport {
        key: meta.key(),
        file_name: meta.file_name,
        outcome: IngestOutcome::Failed { stage, reason },
    }
}

/// Ingest files and directories, one document at a time.
///
/// A failing document is reported and skipped; the run continues.
pub fn ingest_paths(
    ingestor: &mut Ingestor<'_>,
    paths: &[PathBuf],
    options: &PathOptions,
) -> Result<BatchReport> {
    let files = discover_documents(paths)?;
    info!(files = files.len(), "ingesting");

    let text_dir = options.text_dir.as_deref();
    let mut report = BatchReport::default();
    for path in &files {
        let doc = ingest_file(ingestor, path, options, text_dir);
        if doc.is_failure() {
            warn!("{doc}");
        }
        report.documents.push(doc);
    }
    debug!("{}", report.summary());
    Ok(report)
}

fn ingest_file(
    ingestor: &mut Ingestor<'_>,
    path: &Path,
    options: &PathOptions,
    text_dir: Option<&Path>,
) -> DocumentReport {
    let mut meta = extract_metadata(path, text_dir);
    meta.team = options.team;
    meta.tags = options.tags.clone();
    ingestor.ingest_text(meta, extract_text(path, text_dir))
}
