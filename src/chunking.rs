//! Paragraph chunking of extracted document text.
//!
//! A chunk is one paragraph: text between runs of two or more newlines,
//! trimmed. Paragraph size is unbounded by default; a ceiling can be
//! configured together with an [`OverflowPolicy`] for paragraphs that
//! exceed it (dense tables extracted from spreadsheets are the usual case).

use std::str::FromStr;

use crate::error::{Error, Result};

/// How far back from a window's end to look for whitespace to break at.
const BOUNDARY_LOOKBACK_CHARS: usize = 100;

/// What to do with a paragraph longer than the configured ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail the document with [`Error::ChunkTooLarge`].
    Reject,
    /// Sub-split the paragraph into windows no longer than the ceiling.
    #[default]
    Split,
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "split" => Ok(Self::Split),
            other => Err(Error::Config(format!(
                "unknown chunk overflow policy '{other}' (expected reject or split)"
            ))),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reject => f.write_str("reject"),
            Self::Split => f.write_str("split"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters. `None` means unbounded.
    pub max_chars: Option<usize>,
    pub overflow: OverflowPolicy,
}

/// Split text into trimmed, non-empty paragraphs.
///
/// # Examples
///
/// ```
/// use rolerag::chunking::chunk_text;
///
/// let chunks = chunk_text("First paragraph.\n\n\nSecond\nparagraph.\n");
/// assert_eq!(chunks, vec!["First paragraph.", "Second\nparagraph."]);
///
/// assert!(chunk_text("   \n\n  ").is_empty());
/// ```
pub fn chunk_text(text: &str) -> Vec<String> {
    split_paragraphs(text).map(str::to_string).collect()
}

/// Split text into paragraphs, enforcing the configured size ceiling.
pub fn chunk_with(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    let Some(max) = config.max_chars.filter(|&max| max > 0) else {
        return Ok(chunk_text(text));
    };

    let mut chunks = Vec::new();
    for paragraph in split_paragraphs(text) {
        let len = paragraph.chars().count();
        if len <= max {
            chunks.push(paragraph.to_string());
            continue;
        }
        match config.overflow {
            OverflowPolicy::Reject => {
                return Err(Error::ChunkTooLarge { len, max });
            }
            OverflowPolicy::Split => {
                chunks.extend(split_oversized(paragraph, max));
            }
        }
    }
    Ok(chunks)
}

fn split_paragraphs(text: &str) -> impl Iterator<Item = &str> {
    ParagraphBreaks { rest: text }
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Iterator over the text between runs of two or more `\n`.
struct ParagraphBreaks<'a> {
    rest: &'a str,
}

impl<'a> Iterator for ParagraphBreaks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let bytes = self.rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\n' {
                let run =
                    bytes[i..].iter().take_while(|&&b| b == b'\n').count();
                if run >= 2 {
                    let piece = &self.rest[..i];
                    self.rest = &self.rest[i + run..];
                    return Some(piece);
                }
                i += run;
            } else {
                i += 1;
            }
        }
        let piece = self.rest;
        self.rest = "";
        Some(piece)
    }
}

/// Cut an oversized paragraph into windows of at most `max` characters.
///
/// Handles multi-byte UTF-8 by working on char offsets.
fn split_oversized(paragraph: &str, max: usize) -> Vec<String> {
    let char_to_byte: Vec<usize> = paragraph
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(paragraph.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let mut pieces = Vec::new();
    let mut start_char = 0;

    while start_char < char_count {
        let end_char = (start_char + max).min(char_count);
        let cut_char = if end_char < char_count {
            find_word_boundary_char(
                paragraph,
                &char_to_byte,
                start_char,
                end_char,
            )
        } else {
            end_char
        };

        let piece =
            paragraph[char_to_byte[start_char]..char_to_byte[cut_char]].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        start_char = cut_char;
    }

    pieces
}

/// Find a break point just after the last whitespace before `pos_char`,
/// looking back at most [`BOUNDARY_LOOKBACK_CHARS`]. Falls back to a hard
/// cut at `pos_char`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    start_char: usize,
    pos_char: usize,
) -> usize {
    let search_start_char = pos_char
        .saturating_sub(BOUNDARY_LOOKBACK_CHARS)
        .max(start_char + 1);
    if search_start_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[search_start_char];
    let end_byte = char_to_byte[pos_char];
    let region = &text[start_byte..end_byte];

    match region.rfind(char::is_whitespace) {
        Some(ws_offset) => {
            let ws_byte = start_byte + ws_offset;
            // First char boundary past the whitespace char.
            char_to_byte
                .iter()
                .position(|&b| b > ws_byte)
                .unwrap_or(pos_char)
        }
        None => pos_char,
    }
}
