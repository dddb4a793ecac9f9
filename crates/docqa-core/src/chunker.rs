//! Overlapping fixed-size chunking with boundary preference.
//!
//! Sizes are counted in `char`s. Each chunk is an exact slice of the input; the
//! next chunk starts `overlap` characters before the previous one ended, so
//! dropping the first `overlap` characters of every chunk but the first and
//! concatenating gives back the original text.
use std::collections::HashMap;

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::types::{Chunk, Meta, SourceSpan};

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl Default for Chunker {
    fn default() -> Self {
        let s = ChunkingSettings::default();
        Self { chunk_size: s.chunk_size, overlap: s.chunk_overlap, separators: s.separators }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        Self::from_settings(&ChunkingSettings { chunk_size, chunk_overlap: overlap, ..ChunkingSettings::default() })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        if settings.chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be positive".into()));
        }
        if settings.chunk_overlap >= settings.chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                settings.chunk_overlap, settings.chunk_size
            )));
        }
        let separators = settings.separators.iter().filter(|s| !s.is_empty()).cloned().collect();
        Ok(Self { chunk_size: settings.chunk_size, overlap: settings.chunk_overlap, separators })
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }

    pub fn overlap(&self) -> usize { self.overlap }

    pub fn split(&self, raw_text: &str, source: &str) -> Vec<Chunk> {
        self.split_from(raw_text, source, &Meta::new(), 0)
    }

    /// Splits several spans, numbering positions continuously per source.
    pub fn split_spans(&self, spans: &[SourceSpan]) -> Vec<Chunk> {
        let mut next_position: HashMap<&str, usize> = HashMap::new();
        let mut out = Vec::new();
        for span in spans {
            let start = next_position.get(span.source.as_str()).copied().unwrap_or(0);
            let chunks = self.split_from(&span.text, &span.source, &span.metadata, start);
            next_position.insert(span.source.as_str(), start + chunks.len());
            out.extend(chunks);
        }
        out
    }

    fn split_from(&self, text: &str, source: &str, meta: &Meta, first_position: usize) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.spans(text)
            .into_iter()
            .enumerate()
            .map(|(i, (lo, hi))| Chunk::new(source, first_position + i, &text[lo..hi], meta.clone()))
            .collect()
    }

    /// Byte ranges of the chunks of `text`.
    fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        // offsets[i] is the byte offset of char i; offsets[n] == text.len()
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        let n = offsets.len() - 1;

        let min_len = self.overlap.max(self.chunk_size / 2) + 1;
        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            if n - start <= self.chunk_size {
                spans.push((offsets[start], offsets[n]));
                break;
            }
            let hard = start + self.chunk_size;
            let end = self.find_break(text, &offsets, start, start + min_len, hard).unwrap_or(hard);
            spans.push((offsets[start], offsets[end]));
            start = end - self.overlap;
        }
        spans
    }

    /// Latest preferred break in `[lo, hi]` (char indices), by separator priority.
    fn find_break(&self, text: &str, offsets: &[usize], start: usize, lo: usize, hi: usize) -> Option<usize> {
        if lo > hi {
            return None;
        }
        let window_start = offsets[start];
        let window = &text[window_start..offsets[hi]];
        for sep in &self.separators {
            let Some(i) = window.rfind(sep.as_str()) else { continue };
            let cut = window_start + i + sep.len();
            if cut < offsets[lo] {
                continue;
            }
            if let Ok(idx) = offsets.binary_search(&cut) {
                return Some(idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    fn sample_text() -> String {
        let para = "Choice is the act of selecting among alternatives. People weigh options! \
                    Do they always choose well? Not necessarily, as research shows.";
        (0..12).map(|i| format!("{i}. {para}")).collect::<Vec<_>>().join("\n\n")
    }

    #[test]
    fn empty_and_whitespace_produce_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.split("", "a.txt").is_empty());
        assert!(chunker.split(" \n\t\n ", "a.txt").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.split("Short text.", "a.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text.");
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].id, "a.txt:0");
    }

    #[test]
    fn round_trip_and_overlap() {
        let text = sample_text();
        let chunker = Chunker::new(300, 60).expect("chunker");
        let chunks = chunker.split(&text, "doc");
        assert!(chunks.len() > 2);
        assert_eq!(reconstruct(&chunks, 60), text);
        for pair in chunks.windows(2) {
            let tail: String = {
                let chars: Vec<char> = pair[0].text.chars().collect();
                chars[chars.len() - 60..].iter().collect()
            };
            let head: String = pair[1].text.chars().take(60).collect();
            assert_eq!(tail, head);
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i);
            assert!(c.text.chars().count() <= 300);
        }
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = sample_text();
        let chunker = Chunker::new(400, 50).expect("chunker");
        let chunks = chunker.split(&text, "doc");
        // every chunk but the last ends right after a blank line
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.ends_with("\n\n"), "chunk did not end at a paragraph: {:?}", c.text);
        }
    }

    #[test]
    fn hard_cut_without_separators() {
        let text = "x".repeat(250);
        let chunker = Chunker::new(100, 20).expect("chunker");
        let chunks = chunker.split(&text, "doc");
        assert_eq!(chunks[0].text.len(), 100);
        assert_eq!(reconstruct(&chunks, 20), text);
    }

    #[test]
    fn multibyte_text_round_trips() {
        let text = "Ünïcödé façade — naïve café. ".repeat(40);
        let chunker = Chunker::new(120, 30).expect("chunker");
        let chunks = chunker.split(&text, "u");
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks, 30), text);
    }

    #[test]
    fn spans_continue_positions_and_keep_metadata() {
        let chunker = Chunker::new(50, 10).expect("chunker");
        let spans = vec![
            SourceSpan::new("book.pdf", "First page text that is long enough to be split in two parts.").with_meta("page", "1"),
            SourceSpan::new("book.pdf", "Second page.").with_meta("page", "2"),
            SourceSpan::new("notes.txt", "Other doc."),
        ];
        let chunks = chunker.split_spans(&spans);
        let book: Vec<&Chunk> = chunks.iter().filter(|c| c.source == "book.pdf").collect();
        let positions: Vec<usize> = book.iter().map(|c| c.position).collect();
        assert_eq!(positions, (0..book.len()).collect::<Vec<_>>());
        assert_eq!(book.last().and_then(|c| c.page()), Some("2"));
        assert_eq!(book[0].page(), Some("1"));
        let notes: Vec<&Chunk> = chunks.iter().filter(|c| c.source == "notes.txt").collect();
        assert_eq!(notes[0].position, 0);
        assert!(notes[0].extra_metadata.is_empty());
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(matches!(Chunker::new(0, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(Chunker::new(10, 10), Err(Error::InvalidArgument(_))));
    }
}
