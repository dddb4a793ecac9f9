//! Reads `.txt` and `.pdf` files under a data directory into [`SourceSpan`]s.
use std::fs;
use std::path::{Path, PathBuf};

use crate::chunker::Chunker;
use crate::error::{Error, Result};
use crate::types::{Chunk, SourceSpan};

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    data_dir: PathBuf,
    file_limit: Option<usize>,
}

impl DocumentLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), file_limit: None }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.file_limit = limit;
        self
    }

    pub fn load(&self) -> Result<Vec<SourceSpan>> {
        if !self.data_dir.is_dir() {
            return Err(Error::InvalidArgument(format!("data directory {} does not exist", self.data_dir.display())));
        }
        let mut files = self.list_files();
        if files.is_empty() {
            tracing::warn!(dir = %self.data_dir.display(), "no .txt or .pdf files found");
            return Ok(vec![]);
        }
        if let Some(limit) = self.file_limit {
            if files.len() > limit {
                files.truncate(limit);
                tracing::info!(limit, "limited to first files");
            }
        }
        let mut spans = Vec::new();
        for (file_index, path) in files.iter().enumerate() {
            tracing::debug!(file = %path.display(), "loading file {}/{}", file_index + 1, files.len());
            match extension(path).as_deref() {
                Some("txt") => spans.push(SourceSpan::new(path.to_string_lossy(), read_text(path)?)),
                #[cfg(feature = "pdf")]
                Some("pdf") => spans.extend(pdf::read_pages(path)?),
                _ => {}
            }
        }
        tracing::info!(files = files.len(), spans = spans.len(), "loaded documents");
        Ok(spans)
    }

    pub fn load_and_split(&self, chunker: &Chunker) -> Result<Vec<Chunk>> {
        let spans = self.load()?;
        let chunks = chunker.split_spans(&spans);
        tracing::info!(chunks = chunks.len(), "split documents");
        Ok(chunks)
    }

    fn list_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&self.data_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| match extension(p).as_deref() {
                Some("txt") => true,
                Some("pdf") => cfg!(feature = "pdf"),
                _ => false,
            })
            .collect();
        files.sort();
        files
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

fn read_text(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

#[cfg(feature = "pdf")]
mod pdf {
    use std::path::Path;

    use crate::error::{Error, Result};
    use crate::types::{SourceSpan, PAGE_KEY};

    /// One span per page with text; scanned pages without a text layer are skipped.
    pub(super) fn read_pages(path: &Path) -> Result<Vec<SourceSpan>> {
        let doc = lopdf::Document::load(path)
            .map_err(|e| Error::InvalidArgument(format!("failed to load PDF {}: {e}", path.display())))?;
        let source = path.to_string_lossy().to_string();
        let mut spans = Vec::new();
        for page in doc.get_pages().keys() {
            match doc.extract_text(&[*page]) {
                Ok(text) if !text.trim().is_empty() => {
                    spans.push(SourceSpan::new(source.clone(), text).with_meta(PAGE_KEY, page.to_string()));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(file = %path.display(), page, error = %e, "skipping unreadable page"),
            }
        }
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_txt_files_sorted_and_ignores_others() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.txt"), "bravo").unwrap();
        fs::write(tmp.path().join("a.TXT"), "alpha").unwrap();
        fs::write(tmp.path().join("c.md"), "ignored").unwrap();
        let spans = DocumentLoader::new(tmp.path()).load().unwrap();
        let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "bravo"]);
        assert!(spans[0].source.ends_with("a.TXT"));
    }

    #[test]
    fn invalid_utf8_is_read_lossily() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.txt"), [b'o', b'k', 0xff, b'!']).unwrap();
        let spans = DocumentLoader::new(tmp.path()).load().unwrap();
        assert_eq!(spans[0].text, "ok\u{fffd}!");
    }

    #[test]
    fn missing_dir_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = DocumentLoader::new(tmp.path().join("nope")).load().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
