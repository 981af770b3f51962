//! Remote embedding provider backed by the Gemini `batchEmbedContents` API.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    embedding::{EmbeddingProvider, EmbeddingTask},
    error::{Error, Result},
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "models/embedding-001";

pub struct GeminiEmbedder {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl GeminiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: normalize_model(model.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Build from `ROLERAG_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ROLERAG_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| {
                Error::Config(
                    "no API key: set ROLERAG_API_KEY or GOOGLE_API_KEY".into(),
                )
            })?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/{}:batchEmbedContents", self.base_url, self.model)
    }

    fn request_body<'a>(
        &'a self,
        texts: &'a [String],
        task: EmbeddingTask,
    ) -> BatchRequest<'a> {
        BatchRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: &self.model,
                    content: Content {
                        parts: vec![Part { text }],
                    },
                    task_type: task_type(task),
                })
                .collect(),
        }
    }
}

impl EmbeddingProvider for GeminiEmbedder {
    fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, count = texts.len(), "requesting embeddings");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(texts, task))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }

        let parsed: BatchResponse = response.json()?;
        parse_embeddings(parsed, texts.len())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for GeminiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn normalize_model(model: String) -> String {
    if model.starts_with("models/") {
        model
    } else {
        format!("models/{model}")
    }
}

fn task_type(task: EmbeddingTask) -> &'static str {
    match task {
        EmbeddingTask::Document => "RETRIEVAL_DOCUMENT",
        EmbeddingTask::Query => "RETRIEVAL_QUERY",
    }
}

fn classify_failure(status: u16, body: &str) -> Error {
    let message = format!("HTTP {status}: {}", body.trim());
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        Error::RateLimited(message)
    } else {
        Error::Embedding(message)
    }
}

fn parse_embeddings(
    response: BatchResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.embeddings.len() != expected {
        return Err(Error::Embedding(format!(
            "expected {expected} embeddings, got {}",
            response.embeddings.len()
        )));
    }
    Ok(response.embeddings.into_iter().map(|e| e.values).collect())
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}
