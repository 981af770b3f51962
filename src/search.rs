use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::{
    access::{Role, accessible_documents},
    chunk_store::{ChunkStore, StoreHealth},
    doc_id::DocumentKey,
    embedding::{EmbeddingProvider, EmbeddingTask, RetryPolicy, embed_with_retry},
    error::{Error, Result},
    metadata::MetadataIndex,
};

/// Shown when a result's document has no metadata entry.
const UNKNOWN_FILE_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub top_k: usize,
    /// Candidates requested per wanted result, to absorb filtering losses.
    pub oversample_factor: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            oversample_factor: 5,
        }
    }
}

/// One authorized, deduplicated chunk with its document's attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub chunk_text: String,
    pub document: DocumentKey,
    pub file_name: String,
    pub file_path: String,
    pub title: String,
    pub distance: f32,
}

/// Run a role-filtered semantic search.
///
/// 1. Resolve the documents `role` may see
/// 2. Embed the query with the query task
/// 3. Fetch `top_k * oversample_factor` nearest chunks
/// 4. Walk them nearest first, keeping accessible chunks whose exact text
///    has not been kept yet, until `top_k` are kept
///
/// Filtering happens only after the nearest-neighbour search, so fewer than
/// `top_k` results come back when too many candidates are filtered out.
/// An empty store, an unreadable Metadata Index, or a failing provider all
/// give an empty result. A misaligned store is an error.
pub fn execute_search(
    metadata: &MetadataIndex,
    store: &ChunkStore,
    provider: &dyn EmbeddingProvider,
    retry: &RetryPolicy,
    query: &str,
    role: Role,
    params: &SearchParams,
) -> Result<Vec<SearchResult>> {
    if let StoreHealth::Misaligned { records, vectors } = store.health() {
        return Err(Error::AlignmentViolation {
            records: *records,
            vectors: *vectors,
        });
    }

    let accessible = match accessible_documents(metadata, role) {
        Ok(keys) => keys,
        Err(e) => {
            error!(%role, "could not resolve accessible documents: {e}");
            return Ok(Vec::new());
        }
    };
    if params.top_k == 0 || store.is_empty() || accessible.is_empty() {
        return Ok(Vec::new());
    }

    let query_vector = match embed_with_retry(
        provider,
        &[query.to_string()],
        EmbeddingTask::Query,
        retry,
    ) {
        Ok(mut vectors) => vectors.pop().unwrap_or_default(),
        Err(e) => {
            error!(provider = provider.name(), "query embedding failed: {e}");
            return Ok(Vec::new());
        }
    };

    let candidate_count =
        params.top_k.saturating_mul(params.oversample_factor.max(1));
    let candidates = store.search(&query_vector, candidate_count)?;
    debug!(
        %role,
        candidates = candidates.len(),
        accessible = accessible.len(),
        "filtering candidates"
    );

    let mut seen: HashSet<&str> = HashSet::new();
    let mut results = Vec::with_capacity(params.top_k);
    for neighbor in candidates {
        let Some(record) = store.record(neighbor.position) else {
            warn!(position = neighbor.position, "candidate has no record");
            continue;
        };
        if !accessible.contains(&record.document)
            || !seen.insert(record.text.as_str())
        {
            continue;
        }

        let meta = match metadata.get(&record.document) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(document = %record.document, "metadata lookup failed: {e}");
                None
            }
        };
        let (file_name, file_path, title) = match meta {
            Some(meta) => {
                let title = meta.display_title();
                (meta.file_name, meta.file_path, title)
            }
            None => (
                UNKNOWN_FILE_NAME.to_string(),
                String::new(),
                record.document.to_string(),
            ),
        };

        results.push(SearchResult {
            rank: results.len() + 1,
            chunk_text: record.text.clone(),
            document: record.document.clone(),
            file_name,
            file_path,
            title,
            distance: neighbor.distance,
        });
        if results.len() == params.top_k {
            break;
        }
    }

    Ok(results)
}

/// Render results for the answer-synthesis prompt, one
/// `[Source: <file_name>]` block per chunk.
pub fn source_tagged_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("[Source: {}]\n{}", r.file_name, r.chunk_text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!("{:>3}. [{:.4}] {} ({})", r.rank, r.distance, r.title, r.file_name);
        for line in r.chunk_text.lines().take(3) {
            println!("     {line}");
        }
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    role: String,
    result_count: usize,
    results: &'a [SearchResult],
}

/// Format results as JSON output.
pub fn format_json(results: &[SearchResult], query: &str, role: Role) -> Result<()> {
    let output = JsonOutput {
        query,
        role: role.to_string(),
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
