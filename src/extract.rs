//! Text and metadata extraction for ingested files.
//!
//! Rich formats (PDF, Word, Excel, PowerPoint) are converted to text by an
//! external service which writes a `<stem>.txt` twin into a processed-text
//! directory. Markdown and plain text are read directly.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, warn};

use crate::metadata::DocumentMetadata;

/// Prefix the extraction service uses instead of failing.
const UNSUPPORTED_PREFIX: &str = "Unsupported file type:";

/// Outcome of extracting a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    /// Nothing usable was extracted; the reason is human-readable.
    NoContent(String),
}

impl Extraction {
    /// Interpret the raw output of the extraction service, which reports
    /// failures as explanatory strings rather than errors.
    pub fn from_service_output(output: String) -> Self {
        let trimmed = output.trim();
        if trimmed.starts_with(UNSUPPORTED_PREFIX)
            || trimmed == "Extraction Error"
        {
            Extraction::NoContent(trimmed.to_string())
        } else {
            Extraction::Text(output)
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Extraction::Text(text) => Some(text),
            Extraction::NoContent(_) => None,
        }
    }
}

/// The processed-text twin of `path` inside `text_dir`, if it exists.
pub fn text_twin(path: &Path, text_dir: Option<&Path>) -> Option<PathBuf> {
    let stem = path.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".txt");
    let twin = text_dir?.join(name);
    twin.is_file().then_some(twin)
}

/// Extract the text of `path`, preferring its twin in `text_dir`.
pub fn extract_text(path: &Path, text_dir: Option<&Path>) -> Extraction {
    if let Some(twin) = text_twin(path, text_dir) {
        debug!(twin = %twin.display(), "using processed text twin");
        return read_text(&twin);
    }

    let ext = extension(path);
    match ext.as_str() {
        "md" | "txt" => read_text(path),
        "" => Extraction::from_service_output(format!("{UNSUPPORTED_PREFIX} ")),
        other => {
            Extraction::from_service_output(format!("{UNSUPPORTED_PREFIX} .{other}"))
        }
    }
}

fn read_text(path: &Path) -> Extraction {
    match std::fs::read(path) {
        Ok(bytes) => Extraction::from_service_output(
            String::from_utf8_lossy(&bytes).into_owned(),
        ),
        Err(e) => {
            warn!(path = %path.display(), "could not read document: {e}");
            Extraction::NoContent(format!("could not read {}: {e}", path.display()))
        }
    }
}

/// Category derived from the original file's extension.
pub fn category_for(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "pdf" => "pdf",
        "docx" => "word",
        "xlsx" => "excel",
        "pptx" => "pptx",
        "md" | "txt" => "text",
        _ => "other",
    }
}

/// Collect descriptive attributes of `path`.
///
/// Filesystem attributes that cannot be read are left unset. The title
/// comes from the first `# ` heading of the document's text, when it has
/// readable text.
pub fn extract_metadata(path: &Path, text_dir: Option<&Path>) -> DocumentMetadata {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut meta = DocumentMetadata::new(file_name);
    meta.file_path = path.to_string_lossy().into_owned();
    meta.category = Some(category_for(path).to_string());

    match std::fs::metadata(path) {
        Ok(stat) => {
            meta.size_bytes = Some(stat.len());
            meta.modified = stat.modified().ok().map(unix_seconds);
            meta.created = stat.created().ok().map(unix_seconds);
        }
        Err(e) => {
            warn!(path = %path.display(), "could not stat document: {e}");
        }
    }

    let twin = text_twin(path, text_dir);
    meta.text_path = twin.as_ref().map(|t| t.to_string_lossy().into_owned());

    let readable = twin.is_some() || matches!(category_for(path), "text");
    if readable && let Some(text) = extract_text(path, text_dir).text() {
        meta.title = extract_title(text);
    }
    meta
}

/// The first non-empty markdown level-one heading.
fn extract_title(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let heading = line.trim().strip_prefix("# ")?.trim();
        (!heading.is_empty()).then(|| heading.to_string())
    })
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
