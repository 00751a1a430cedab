//! Chunk Variant Reducer
//!
//! Turns the raw outputs of one recognition pass into a ranked list of
//! candidate texts. Identical candidates are merged with a score bonus, the
//! list is cleaned up, and every candidate except the best one is annotated
//! with the characters only it contains, so a reader can spot where variants
//! disagree.

pub mod postprocess;

pub use postprocess::{CjkSpacingCorrector, ReplaceRules, TextCorrector};

use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use crate::geometry::Rectangle;
use crate::ocr::hocr::{clean_plain_text, parse_hocr};
use crate::ocr::{RawContent, RawVariant};

/// Bonus per extra variant that produced the same text
const DUPLICATE_BONUS: i32 = 5;
/// Score of backends that report no confidence
const PLAIN_TEXT_SCORE: i32 = 100;

/// Why a pass produced no candidates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    #[error("no variant produced recognizable text")]
    NoParseableOutput,
    #[error("no candidate left after postprocessing")]
    ZeroVariants,
}

/// One candidate text
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    content: String,
    original_content: Option<String>,
    labels: Vec<String>,
    score: i32,
    first_word_bounds: Option<Rectangle>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, label: impl Into<String>, score: i32) -> Self {
        Self {
            content: content.into(),
            original_content: None,
            labels: vec![label.into()],
            score,
            first_word_bounds: None,
        }
    }

    pub fn with_first_word_bounds(mut self, bounds: Option<Rectangle>) -> Self {
        self.first_word_bounds = bounds;
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Text before the first modification, if it was modified
    pub fn original_content(&self) -> Option<&str> {
        self.original_content.as_deref()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn first_word_bounds(&self) -> Option<Rectangle> {
        self.first_word_bounds
    }

    /// Replace the text, remembering what it was before the first change
    pub fn modify_content(&mut self, modify: impl FnOnce(&str) -> String) {
        let modified = modify(&self.content);
        if modified == self.content {
            return;
        }
        if self.original_content.is_none() {
            self.original_content = Some(std::mem::take(&mut self.content));
        }
        self.content = modified;
    }
}

/// Candidates of one recognition pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkVariants {
    chunks: Vec<Chunk>,
}

impl ChunkVariants {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn into_vec(self) -> Vec<Chunk> {
        self.chunks
    }

    /// Merge chunks with identical text.
    ///
    /// The merged score is the group's best plus a bonus per duplicate; labels
    /// are united in first-seen order. Groups keep the position of their first
    /// member.
    pub fn dedup(&mut self) {
        let mut merged: Vec<(Chunk, i32, usize)> = Vec::new();
        for chunk in self.chunks.drain(..) {
            match merged.iter_mut().find(|(m, _, _)| m.content == chunk.content) {
                Some((existing, best, count)) => {
                    *best = (*best).max(chunk.score);
                    *count += 1;
                    for label in chunk.labels {
                        if !existing.labels.contains(&label) {
                            existing.labels.push(label);
                        }
                    }
                }
                None => {
                    let score = chunk.score;
                    merged.push((chunk, score, 1));
                }
            }
        }
        self.chunks = merged
            .into_iter()
            .map(|(mut chunk, best, count)| {
                chunk.score = best + DUPLICATE_BONUS * (count as i32 - 1);
                chunk
            })
            .collect();
    }

    /// Stable sort, best score first
    pub fn sort_by_score(&mut self) {
        self.chunks.sort_by(|a, b| b.score.cmp(&a.score));
    }
}

/// A ranked candidate ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostprocessedChunk {
    pub content: String,
    /// Text before correction, when correction changed it
    pub original_content: Option<String>,
    pub labels: Vec<String>,
    pub score: i32,
    /// Character indices (not byte offsets) found in no other candidate
    pub unique_char_indices: Vec<usize>,
    /// First recognized word, in input image coordinates
    pub first_word_bounds: Option<Rectangle>,
}

/// For each text, the character indices whose character occurs in no other text.
///
/// Newlines are never marked.
pub fn unique_char_indices(texts: &[&str]) -> Vec<Vec<usize>> {
    let char_sets: Vec<HashSet<char>> = texts.iter().map(|t| t.chars().collect()).collect();
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            text.chars()
                .enumerate()
                .filter(|(_, c)| *c != '\n')
                .filter(|(_, c)| {
                    char_sets
                        .iter()
                        .enumerate()
                        .all(|(j, set)| j == i || !set.contains(c))
                })
                .map(|(idx, _)| idx)
                .collect()
        })
        .collect()
}

/// Turn one raw output into a chunk, if it has permitted content
pub fn parse_variant(raw: &RawVariant) -> Option<Chunk> {
    match &raw.content {
        RawContent::Hocr(markup) => {
            let parsed = parse_hocr(markup)?;
            Some(Chunk::new(parsed.text, raw.label.clone(), parsed.score).with_first_word_bounds(parsed.first_word))
        }
        RawContent::PlainText(text) => {
            clean_plain_text(text).map(|t| Chunk::new(t, raw.label.clone(), PLAIN_TEXT_SCORE))
        }
    }
}

/// Reduces raw outputs to ranked candidates
#[derive(Default)]
pub struct ChunkReducer {
    corrector: Option<Box<dyn TextCorrector>>,
    rules: ReplaceRules,
}

impl ChunkReducer {
    pub fn new(corrector: Option<Box<dyn TextCorrector>>, rules: ReplaceRules) -> Self {
        Self { corrector, rules }
    }

    pub fn reduce(&self, raw: &[RawVariant]) -> Result<Vec<PostprocessedChunk>, ReduceError> {
        let mut variants = ChunkVariants::new(raw.iter().filter_map(parse_variant).collect());
        if variants.is_empty() {
            return Err(ReduceError::NoParseableOutput);
        }

        variants.dedup();
        variants.sort_by_score();
        debug!("{} raw outputs reduced to {} candidates", raw.len(), variants.len());

        let ranked: Vec<Chunk> = variants
            .into_vec()
            .into_iter()
            .filter_map(|mut chunk| {
                if let Some(corrector) = &self.corrector {
                    chunk.modify_content(|t| corrector.correct(t));
                }
                if !self.rules.is_empty() {
                    chunk.modify_content(|t| self.rules.apply(t));
                }
                (!chunk.content.trim().is_empty()).then_some(chunk)
            })
            .collect();
        if ranked.is_empty() {
            return Err(ReduceError::ZeroVariants);
        }

        let texts: Vec<&str> = ranked.iter().map(|c| c.content()).collect();
        let mut unique = unique_char_indices(&texts);
        // the top candidate is the reference the others are compared against
        unique[0].clear();

        Ok(ranked
            .into_iter()
            .zip(unique)
            .map(|(chunk, unique_char_indices)| PostprocessedChunk {
                content: chunk.content,
                original_content: chunk.original_content,
                labels: chunk.labels,
                score: chunk.score,
                unique_char_indices,
                first_word_bounds: chunk.first_word_bounds,
            })
            .collect())
    }
}
