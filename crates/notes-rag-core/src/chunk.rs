//! Token-window text chunker.
//!
//! Splits normalized documents into [`Chunk`]s of at most `chunk_size`
//! tokens, counted with the same BPE encoding the language model uses
//! (`cl100k_base` by default). Consecutive chunks of one document share
//! `chunk_overlap` tokens; chunks never span two documents.
//!
//! # Algorithm
//!
//! 1. Encode the whole document into BPE tokens.
//! 2. Take a window of `chunk_size` tokens starting at token 0.
//! 3. Decode the window back to text. A window that ends inside a
//!    multi-byte character does not decode, so its end is pulled back one
//!    token at a time until it does.
//! 4. Advance the window start to `end - chunk_overlap` and repeat until
//!    the last token is covered.
//!
//! The same text and configuration always produce the same boundaries.
//!
//! # Example
//!
//! ```rust
//! use notes_rag_core::chunk::{Chunker, ChunkerConfig};
//! use notes_rag_core::models::NormalizedDocument;
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let doc = NormalizedDocument::new("notes/a.txt", "Paris is the capital of France.");
//! let chunks = chunker.split(&[doc]);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].sequence_index, 0);
//! ```

use tiktoken_rs::{CoreBPE, Rank};

use crate::error::ChunkingError;
use crate::models::{Chunk, NormalizedDocument};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Smallest usable window. A UTF-8 character is at most 4 bytes, so it
/// never needs more than 4 tokens; a smaller window could fail to decode.
pub const MIN_CHUNK_SIZE: usize = 4;

/// Chunk sizing and tokenizer selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk.
    pub chunk_size: usize,
    /// Tokens shared between consecutive chunks of the same document.
    pub chunk_overlap: usize,
    /// BPE encoding name: `cl100k_base`, `o200k_base`, `p50k_base`, or `r50k_base`.
    pub encoding: String,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            encoding: DEFAULT_ENCODING.to_string(),
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(ChunkingError::InvalidConfig(format!(
                "chunk_size ({}) must be at least {}",
                self.chunk_size, MIN_CHUNK_SIZE
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkingError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

fn load_encoding(name: &str) -> Result<CoreBPE, ChunkingError> {
    let bpe = match name {
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "r50k_base" => tiktoken_rs::r50k_base(),
        other => return Err(ChunkingError::UnknownEncoding(other.to_string())),
    };
    bpe.map_err(|e| ChunkingError::Tokenizer(e.to_string()))
}

/// Deterministic token-bounded splitter.
pub struct Chunker {
    config: ChunkerConfig,
    bpe: CoreBPE,
}

impl Chunker {
    /// Validate the configuration and load the BPE encoding.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkingError> {
        config.validate()?;
        let bpe = load_encoding(&config.encoding)?;
        Ok(Self { config, bpe })
    }

    /// Number of tokens `text` encodes to.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Split every document, in order.
    ///
    /// A document that fails to chunk is logged and skipped; the others
    /// are still returned.
    pub fn split(&self, documents: &[NormalizedDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            match self.split_document(doc) {
                Ok(doc_chunks) => chunks.extend(doc_chunks),
                Err(e) => {
                    tracing::warn!(document = %doc.relative_path, error = %e, "skipping document");
                }
            }
        }
        chunks
    }

    /// Split a single document into chunks with contiguous sequence indices.
    ///
    /// Empty or whitespace-only documents yield no chunks.
    pub fn split_document(&self, doc: &NormalizedDocument) -> Result<Vec<Chunk>, ChunkingError> {
        if doc.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.bpe.encode_ordinary(&doc.text);
        let total = tokens.len();
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < total {
            let max_front = if start == 0 { 0 } else { overlap };
            let (s, e, text) = self.decode_window(doc, &tokens, start, max_front)?;

            chunks.push(Chunk {
                owner_document: doc.relative_path.clone(),
                sequence_index: chunks.len(),
                text,
                token_count: e - s,
            });

            if e >= total {
                break;
            }
            start = e.saturating_sub(overlap).max(s + 1);
        }

        Ok(chunks)
    }

    /// Decode a window of at most `chunk_size` tokens at `start`, shrinking
    /// it until it lands on character boundaries. The start may move forward
    /// by at most `max_front` tokens (those are already covered by the
    /// previous chunk).
    fn decode_window(
        &self,
        doc: &NormalizedDocument,
        tokens: &[Rank],
        start: usize,
        max_front: usize,
    ) -> Result<(usize, usize, String), ChunkingError> {
        let total = tokens.len();
        for front in 0..=max_front {
            let s = start + front;
            if s >= total {
                break;
            }
            let mut e = (s + self.config.chunk_size).min(total);
            while e > s {
                if let Ok(text) = self.bpe.decode(tokens[s..e].to_vec()) {
                    return Ok((s, e, text));
                }
                e -= 1;
            }
        }
        Err(ChunkingError::Decode {
            document: doc.relative_path.clone(),
            start,
            end: (start + self.config.chunk_size).min(total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            encoding: DEFAULT_ENCODING.to_string(),
        })
        .unwrap()
    }

    fn long_text() -> String {
        (0..400)
            .map(|i| format!("Note line {} talks about gardening and compost.", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_short_document_single_chunk() {
        let c = chunker(500, 0);
        let doc = NormalizedDocument::new("notes/a.txt", "Paris is the capital of France.");
        let chunks = c.split_document(&doc).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Paris is the capital of France.");
        assert_eq!(chunks[0].owner_document, "notes/a.txt");
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].token_count, c.count_tokens(&doc.text));
    }

    #[test]
    fn test_empty_document_no_chunks() {
        let c = chunker(500, 0);
        assert!(c
            .split_document(&NormalizedDocument::new("e.txt", ""))
            .unwrap()
            .is_empty());
        assert!(c
            .split_document(&NormalizedDocument::new("w.txt", "  \n\t "))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_chunks_respect_token_bound() {
        let c = chunker(50, 0);
        let text = long_text();
        let chunks = c
            .split_document(&NormalizedDocument::new("long.txt", text.clone()))
            .unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 50);
            assert!(chunk.token_count > 0);
        }
        let total: usize = chunks.iter().map(|ch| ch.token_count).sum();
        assert_eq!(total, c.count_tokens(&text));
    }

    #[test]
    fn test_zero_overlap_reconstructs_text() {
        let c = chunker(37, 0);
        let text = long_text();
        let chunks = c
            .split_document(&NormalizedDocument::new("long.txt", text.clone()))
            .unwrap();
        let joined: String = chunks.iter().map(|ch| ch.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_overlap_covers_all_tokens() {
        let c = chunker(40, 10);
        let text = long_text();
        let chunks = c
            .split_document(&NormalizedDocument::new("long.txt", text.clone()))
            .unwrap();
        let total: usize = chunks.iter().map(|ch| ch.token_count).sum();
        assert!(total >= c.count_tokens(&text));
        for chunk in &chunks {
            assert!(chunk.token_count <= 40);
        }
        // Consecutive chunks share text at their seam.
        let first_tail: String = chunks[0].text.chars().rev().take(5).collect();
        let first_tail: String = first_tail.chars().rev().collect();
        assert!(chunks[1].text.contains(&first_tail));
    }

    #[test]
    fn test_sequence_indices_contiguous() {
        let c = chunker(20, 0);
        let chunks = c
            .split_document(&NormalizedDocument::new("long.txt", long_text()))
            .unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence_index, i, "index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let c = chunker(25, 5);
        let doc = NormalizedDocument::new("long.txt", long_text());
        let a = c.split(std::slice::from_ref(&doc));
        let b = c.split(std::slice::from_ref(&doc));
        assert_eq!(a, b);

        let fresh = chunker(25, 5);
        assert_eq!(a, fresh.split(&[doc]));
    }

    #[test]
    fn test_no_cross_document_chunks() {
        let c = chunker(8, 0);
        let docs = vec![
            NormalizedDocument::new("a.txt", "alpha ".repeat(30)),
            NormalizedDocument::new("b.txt", "bravo ".repeat(30)),
        ];
        let chunks = c.split(&docs);
        for chunk in &chunks {
            match chunk.owner_document.as_str() {
                "a.txt" => assert!(!chunk.text.contains("bravo")),
                "b.txt" => assert!(!chunk.text.contains("alpha")),
                other => panic!("unexpected owner {}", other),
            }
        }
        let b_first = chunks
            .iter()
            .find(|ch| ch.owner_document == "b.txt")
            .unwrap();
        assert_eq!(b_first.sequence_index, 0);
    }

    #[test]
    fn test_multibyte_characters_decode() {
        let c = chunker(12, 0);
        let text = "Café ☕ notes 🎉 über straße 日本 ".repeat(10);
        let chunks = c
            .split_document(&NormalizedDocument::new("u.txt", text.clone()))
            .unwrap();
        let joined: String = chunks.iter().map(|ch| ch.text.as_str()).collect();
        assert_eq!(joined, text);
        for chunk in &chunks {
            assert!(chunk.token_count <= 12);
        }
    }

    #[test]
    fn test_minimum_size_keeps_emoji_notes() {
        let c = chunker(MIN_CHUNK_SIZE, 0);
        let text = "party 🎉 time";
        let doc = NormalizedDocument::new("e.txt", text);
        let chunks = c.split_document(&doc).unwrap();
        let joined: String = chunks.iter().map(|ch| ch.text.as_str()).collect();
        assert_eq!(joined, text);
        for chunk in &chunks {
            assert!(chunk.token_count <= MIN_CHUNK_SIZE);
        }
        assert_eq!(c.split(&[doc]).len(), chunks.len());
    }

    #[test]
    fn test_minimum_size_with_overlap_covers_text() {
        let c = chunker(MIN_CHUNK_SIZE, 3);
        let text = "party 🎉 time 日本語";
        let chunks = c
            .split_document(&NormalizedDocument::new("e.txt", text))
            .unwrap();
        assert!(chunks[0].text.starts_with("party"));
        assert!(chunks.last().unwrap().text.ends_with("語"));
        assert!(chunks.iter().any(|ch| ch.text.contains('🎉')));
    }

    #[test]
    fn test_sizes_below_minimum_are_rejected() {
        for size in 1..MIN_CHUNK_SIZE {
            let config = ChunkerConfig {
                chunk_size: size,
                ..ChunkerConfig::default()
            };
            assert!(matches!(
                Chunker::new(config),
                Err(ChunkingError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_invalid_config() {
        let zero = ChunkerConfig {
            chunk_size: 0,
            ..ChunkerConfig::default()
        };
        assert!(matches!(
            Chunker::new(zero),
            Err(ChunkingError::InvalidConfig(_))
        ));

        let overlap = ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 10,
            ..ChunkerConfig::default()
        };
        assert!(matches!(
            Chunker::new(overlap),
            Err(ChunkingError::InvalidConfig(_))
        ));

        let encoding = ChunkerConfig {
            encoding: "gpt2-ish".to_string(),
            ..ChunkerConfig::default()
        };
        assert!(matches!(
            Chunker::new(encoding),
            Err(ChunkingError::UnknownEncoding(_))
        ));
    }
}
