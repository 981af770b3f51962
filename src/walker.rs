use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Extensions picked up when walking a directory.
pub const DOCUMENT_EXTENSIONS: &[&str] =
    &["pdf", "docx", "xlsx", "pptx", "md", "txt"];

/// Expand ingestion arguments into a sorted, de-duplicated file list.
///
/// Files named explicitly are always kept, whatever their extension, so
/// that unsupported uploads still get a per-document report. Directories
/// are walked recursively; there only files with a document extension are
/// kept, and hidden entries (names starting with `.`) are skipped.
pub fn discover_documents(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk_dir(path, &mut results)?;
        } else {
            results.push(path.clone());
        }
    }
    results.sort();
    results.dedup();
    debug!(count = results.len(), "discovered documents");
    Ok(results)
}

fn walk_dir(current: &Path, results: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(&path, results)?;
        } else if file_type.is_symlink() {
            // Followed for files only; directory links could cycle.
            if path.is_file() && is_document(&path) {
                results.push(path);
            }
        } else if file_type.is_file() && is_document(&path) {
            results.push(path);
        }
    }
    Ok(())
}

pub fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                f.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn discovers_document_types() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.pdf", "b.DOCX", "c.xlsx", "d.pptx", "e.md", "f.txt"] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_documents(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(
            names(&files, tmp.path()),
            vec!["a.pdf", "b.DOCX", "c.xlsx", "d.pptx", "e.md", "f.txt"]
        );
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("config.md"), "git config").unwrap();
        std::fs::write(tmp.path().join(".secret.pdf"), "secret").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "notes").unwrap();

        let files = discover_documents(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(names(&files, tmp.path()), vec!["notes.md"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("reports");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.pdf"), "deep").unwrap();
        std::fs::write(tmp.path().join("z.md"), "z").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();

        let files = discover_documents(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(
            names(&files, tmp.path()),
            vec!["a.md", "reports/deep.pdf", "z.md"]
        );
    }

    #[test]
    fn explicit_files_are_kept_and_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let odd = tmp.path().join("diagram.png");
        let doc = tmp.path().join("doc.md");
        std::fs::write(&odd, "binary").unwrap();
        std::fs::write(&doc, "text").unwrap();

        let files =
            discover_documents(&[odd.clone(), doc.clone(), doc.clone()])
                .unwrap();
        assert_eq!(files, vec![odd, doc]);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let files = discover_documents(&[tmp.path().to_path_buf()]).unwrap();
        assert!(files.is_empty());
    }
}
