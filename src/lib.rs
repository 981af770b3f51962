//! rolerag - role-gated semantic retrieval over an organisation's documents.
//!
//! Documents are chunked, embedded through a remote provider and appended to
//! a flat vector index whose positions line up one-to-one with stored chunk
//! records. Every document belongs to a team; a query is issued under a role
//! and only ever sees chunks of documents that role may read.
//!
//! # Quick start
//!
//! ```no_run
//! use rolerag::{ConfigDb, DataDir, GeminiEmbedder, Retriever, Role, Settings, Team};
//! use rolerag::ingestion::PathOptions;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let settings = Settings::load(&config_db).unwrap();
//! let provider = GeminiEmbedder::from_env(settings.embedding_model.clone()).unwrap();
//! let mut retriever = Retriever::open(&data_dir, Box::new(provider), settings).unwrap();
//!
//! let options = PathOptions {
//!     team: Team::RiskTribe,
//!     ..PathOptions::default()
//! };
//! retriever.ingest_paths(&["uploads/Policy_2024.md".into()], &options).unwrap();
//!
//! let results = retriever
//!     .search("credit limits", Role::Member(Team::RiskTribe), None)
//!     .unwrap();
//! for r in &results {
//!     println!("{} ({:.3}): {}", r.file_name, r.distance, r.chunk_text);
//! }
//! ```

pub mod access;
pub mod chunk_store;
pub mod chunking;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod flat_index;
pub mod gemini;
pub mod ingestion;
pub mod metadata;
pub mod retriever;
pub mod search;
pub mod settings;
pub mod walker;

pub use access::{Role, Team};
pub use chunk_store::ChunkStore;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentKey;
pub use embedding::{EmbeddingProvider, EmbeddingTask};
pub use error::{Error, Result};
pub use gemini::GeminiEmbedder;
pub use metadata::{DocumentMetadata, MetadataIndex};
pub use retriever::Retriever;
pub use search::SearchResult;
pub use settings::Settings;
