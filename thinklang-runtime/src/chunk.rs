//! Text and array chunkers

use once_cell::sync::Lazy;
use regex::Regex;
use thinklang_core::{ThinkError, ThinkResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkStrategy {
    #[default]
    Paragraph,
    Sentence,
    Fixed,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkOptions {
    pub max_chars: Option<usize>,
    pub max_tokens: Option<usize>,
    pub strategy: ChunkStrategy,
    pub overlap: usize,
}

impl ChunkOptions {
    /// Character budget: `maxChars ?? maxTokens·4 ?? 4000`.
    pub fn char_limit(&self) -> usize {
        self.max_chars
            .or(self.max_tokens.map(|t| t * 4))
            .unwrap_or(4000)
            .max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedText {
    pub chunks: Vec<String>,
    pub total_chunks: usize,
}

static PARAGRAPH_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph split regex"));
static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?]+[.!?]+\s*|[^.!?]+$").expect("sentence split regex"));

/// Split text into chunks under the configured budget.
pub fn chunk_text(text: &str, options: &ChunkOptions) -> ChunkedText {
    let limit = options.char_limit();

    if text.len() <= limit {
        return ChunkedText {
            chunks: vec![text.to_string()],
            total_chunks: 1,
        };
    }

    let mut chunks = match options.strategy {
        ChunkStrategy::Paragraph => {
            let segments: Vec<&str> = PARAGRAPH_SPLIT.split(text).collect();
            accumulate(&segments, "\n\n", limit)
        }
        ChunkStrategy::Sentence => {
            let segments: Vec<&str> = SENTENCE_SPLIT
                .find_iter(text)
                .map(|m| m.as_str().trim_end())
                .filter(|s| !s.is_empty())
                .collect();
            accumulate(&segments, " ", limit)
        }
        ChunkStrategy::Fixed => fixed_chunks(text, limit, options.overlap),
    };

    // Overlap stitching for the segment strategies: each non-first chunk
    // is prefixed with the tail of its predecessor. Fixed windows already
    // share their overlap.
    if options.overlap > 0 && options.strategy != ChunkStrategy::Fixed {
        let mut stitched = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            if index == 0 {
                stitched.push(chunk.clone());
            } else {
                let prev = &chunks[index - 1];
                let tail = char_tail(prev, options.overlap);
                stitched.push(format!("{}{}", tail, chunk));
            }
        }
        chunks = stitched;
    }

    ChunkedText {
        total_chunks: chunks.len(),
        chunks,
    }
}

/// Greedily pack segments, emitting when the next one would overflow.
/// A single segment over the limit falls back to fixed windows.
fn accumulate(segments: &[&str], joiner: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for segment in segments {
        if segment.len() > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(fixed_chunks(segment, limit, 0));
            continue;
        }

        let needed = if current.is_empty() {
            segment.len()
        } else {
            current.len() + joiner.len() + segment.len()
        };

        if needed > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(joiner);
        }
        current.push_str(segment);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sliding windows of `limit` chars, stepping `limit - overlap`.
fn fixed_chunks(text: &str, limit: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = limit.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();

    let mut start = 0;
    while start < chars.len() {
        let end = (start + limit).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn char_tail(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].iter().collect()
}

/// Deterministic fixed-size grouping; errors on a non-positive size.
pub fn chunk_array<T: Clone>(items: &[T], chunk_size: usize) -> ThinkResult<Vec<Vec<T>>> {
    if chunk_size == 0 {
        return Err(ThinkError::Runtime {
            message: "chunk_array requires a positive chunk size".to_string(),
        });
    }
    Ok(items.chunks(chunk_size).map(|c| c.to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let result = chunk_text("short", &ChunkOptions::default());
        assert_eq!(result.chunks, vec!["short"]);
        assert_eq!(result.total_chunks, 1);
    }

    #[test]
    fn fixed_chunks_concatenate_to_original() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(10);
        let result = chunk_text(
            &text,
            &ChunkOptions {
                max_chars: Some(64),
                strategy: ChunkStrategy::Fixed,
                overlap: 0,
                ..Default::default()
            },
        );
        assert_eq!(result.chunks.concat(), text);
        assert!(result.chunks.iter().all(|c| c.len() <= 64));
    }

    #[test]
    fn fixed_chunks_share_overlap() {
        let text = "0123456789".repeat(20);
        let overlap = 8;
        let result = chunk_text(
            &text,
            &ChunkOptions {
                max_chars: Some(50),
                strategy: ChunkStrategy::Fixed,
                overlap,
                ..Default::default()
            },
        );
        for pair in result.chunks.windows(2) {
            let prev_tail: String = char_tail(&pair[0], overlap);
            assert!(pair[1].starts_with(&prev_tail));
        }
    }

    #[test]
    fn paragraph_strategy_respects_blank_lines() {
        let text = format!("{}\n\n{}\n\n{}", "a".repeat(30), "b".repeat(30), "c".repeat(30));
        let result = chunk_text(
            &text,
            &ChunkOptions {
                max_chars: Some(70),
                strategy: ChunkStrategy::Paragraph,
                ..Default::default()
            },
        );
        // First two paragraphs fit together, the third spills over.
        assert_eq!(result.total_chunks, 2);
        assert!(result.chunks[0].contains("aaa"));
        assert!(result.chunks[0].contains("bbb"));
        assert!(result.chunks[1].contains("ccc"));
    }

    #[test]
    fn oversized_paragraph_falls_back_to_fixed() {
        let text = format!("{}\n\nshort", "x".repeat(200));
        let result = chunk_text(
            &text,
            &ChunkOptions {
                max_chars: Some(50),
                strategy: ChunkStrategy::Paragraph,
                ..Default::default()
            },
        );
        assert!(result.total_chunks >= 4);
        assert!(result.chunks.iter().all(|c| c.len() <= 50));
    }

    #[test]
    fn sentence_strategy_groups_sentences() {
        let text = "One sentence here. Another one follows! A third asks? ".repeat(4);
        let result = chunk_text(
            &text,
            &ChunkOptions {
                max_chars: Some(60),
                strategy: ChunkStrategy::Sentence,
                ..Default::default()
            },
        );
        assert!(result.total_chunks > 1);
        assert!(result.chunks.iter().all(|c| c.len() <= 60));
    }

    #[test]
    fn segment_overlap_prefixes_previous_tail() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let result = chunk_text(
            &text,
            &ChunkOptions {
                max_chars: Some(45),
                strategy: ChunkStrategy::Paragraph,
                overlap: 5,
                ..Default::default()
            },
        );
        assert_eq!(result.total_chunks, 2);
        assert!(result.chunks[1].starts_with("aaaaa"));
    }

    #[test]
    fn chunk_array_partitions_in_order() {
        let items: Vec<i32> = (1..=7).collect();
        let chunks = chunk_array(&items, 3).unwrap();
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);

        let flattened: Vec<i32> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, items);
    }

    #[test]
    fn chunk_array_rejects_zero_size() {
        assert!(chunk_array(&[1, 2, 3], 0).is_err());
    }
}
