//! Recursive separator-based text chunking
//!
//! Text is split on the first separator that occurs in it (`"\n\n"` first),
//! adjacent pieces are merged back up to the size limit, and any piece still
//! too large is split again with the next separator. Chunks never overlap, so
//! joining them with the separators reinserted gives back the original text
//! up to whitespace at chunk boundaries.

use serde::{Deserialize, Serialize};

use crate::models::Email;

/// Separators tried in order; the empty separator splits between characters
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A contiguous segment of one email's canonical text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_email_id: String,
    /// Position within the email, starting at 0
    pub index: usize,
}

/// Splits text into chunks of at most `chunk_size` characters
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    separators: Vec<String>,
}

impl Chunker {
    /// Create a chunker with the default separators
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Chunk an email's canonical text
    ///
    /// An email whose body is empty after trimming yields no chunks.
    pub fn chunk_email(&self, email: &Email) -> Vec<Chunk> {
        if email.text.trim().is_empty() {
            return Vec::new();
        }

        self.split(&email.canonical_text())
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                text,
                source_email_id: email.id.clone(),
                index,
            })
            .collect()
    }

    /// Split text into trimmed, non-empty chunks
    pub fn split(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // First separator present in the text; "" always matches
        let (position, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(**s))
            .map(|(i, s)| (i, *s))
            .unwrap_or((separators.len(), ""));
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }

        chunks
    }

    /// Greedily join pieces with `separator` while staying within the size limit
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0;

        for piece in pieces {
            let piece_len = char_len(piece);
            let added = if current.is_empty() {
                piece_len
            } else {
                piece_len + sep_len
            };

            if !current.is_empty() && current_len + added > self.chunk_size {
                push_trimmed(&mut chunks, &current.join(separator));
                current.clear();
                current_len = 0;
                current.push(piece);
                current_len = piece_len;
            } else {
                current.push(piece);
                current_len += added;
            }
        }

        if !current.is_empty() {
            push_trimmed(&mut chunks, &current.join(separator));
        }

        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
