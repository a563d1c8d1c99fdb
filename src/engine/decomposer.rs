//! Thread decomposition: splitting long content into numbered segments.
//!
//! Lengths are counted in characters, never bytes. A break never falls
//! inside a word; a punctuation mark only counts as a break point when
//! whitespace follows it, so decimals and URLs stay intact.

use tracing::warn;

use crate::constants::{MAX_POST_CHARS, MAX_THREAD_SEGMENTS, SEGMENT_BUDGET, THREAD_MARKER};
use crate::error::DecomposeError;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?'];
const CLAUSE_SEPARATORS: &[char] = &[',', ';', ':'];

#[derive(Debug, Clone, Copy)]
pub struct ThreadDecomposer {
    budget: usize,
    max_segments: usize,
}

impl Default for ThreadDecomposer {
    fn default() -> Self {
        Self {
            budget: SEGMENT_BUDGET,
            max_segments: MAX_THREAD_SEGMENTS,
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_tag(tag: &str) -> Option<String> {
    let body = tag.trim().trim_start_matches('#');
    if body.is_empty() {
        None
    } else {
        Some(format!("#{}", body))
    }
}

/// Tokens like `3/7` or `(3/7)` the generator sometimes adds itself
fn is_numbering(token: &str) -> bool {
    let inner = token.trim_start_matches('(').trim_end_matches(')');
    match inner.split_once('/') {
        Some((a, b)) => {
            !a.is_empty()
                && !b.is_empty()
                && a.chars().all(|c| c.is_ascii_digit())
                && b.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Remove leading or trailing `i/N` numbering from a raw segment.
pub fn strip_numbering(segment: &str) -> String {
    let mut tokens: Vec<&str> = segment.split_whitespace().collect();
    if tokens.first().is_some_and(|t| is_numbering(t)) {
        tokens.remove(0);
    }
    if tokens.last().is_some_and(|t| is_numbering(t)) {
        tokens.pop();
    }
    tokens.join(" ")
}

impl ThreadDecomposer {
    pub fn new(budget: usize, max_segments: usize) -> Self {
        Self {
            budget,
            max_segments,
        }
    }

    /// Split normalized text into segments of at most `budget` characters.
    pub fn split(&self, text: &str) -> Result<Vec<String>, DecomposeError> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(DecomposeError::Empty);
        }
        if let Some(word) = normalized
            .split(' ')
            .find(|w| w.chars().count() > self.budget)
        {
            return Err(DecomposeError::UnbreakableWord {
                len: word.chars().count(),
                budget: self.budget,
            });
        }

        let mut segments = Vec::new();
        let mut rest: Vec<char> = normalized.chars().collect();

        while rest.len() > self.budget {
            let cut = self.find_break(&rest).ok_or(DecomposeError::UnbreakableWord {
                len: rest.len(),
                budget: self.budget,
            })?;
            let head: String = rest[..cut].iter().collect();
            segments.push(head.trim_end().to_string());
            let skip = rest[cut..].iter().take_while(|c| c.is_whitespace()).count();
            rest.drain(..cut + skip);
        }
        if !rest.is_empty() {
            segments.push(rest.into_iter().collect());
        }

        Ok(segments)
    }

    /// Cut index (exclusive) for the head segment of `rest`, which is longer
    /// than the budget.
    fn find_break(&self, rest: &[char]) -> Option<usize> {
        let budget = self.budget;
        let followed_by_space = |i: usize| rest.get(i + 1).is_some_and(|c| c.is_whitespace());

        let last_punct = |set: &[char]| {
            (0..budget)
                .rev()
                .find(|&i| set.contains(&rest[i]) && followed_by_space(i))
                .map(|i| i + 1)
        };

        let sentence_floor = budget * 6 / 10;
        if let Some(cut) = last_punct(SENTENCE_TERMINATORS).filter(|&c| c >= sentence_floor) {
            return Some(cut);
        }

        let clause_floor = budget * 7 / 10;
        if let Some(cut) = last_punct(CLAUSE_SEPARATORS).filter(|&c| c >= clause_floor) {
            return Some(cut);
        }

        // Whitespace at index `budget` means the window ends on a word boundary
        let last_space = (1..=budget).rev().find(|&i| rest[i].is_whitespace());
        let space_floor = budget / 2;
        match last_space {
            Some(cut) if cut >= space_floor => Some(cut),
            other => other,
        }
    }

    /// Split overflowing raw segments and flatten them in order.
    pub fn decompose(
        &self,
        raw_segments: &[String],
        total_count: Option<usize>,
    ) -> Result<Vec<String>, DecomposeError> {
        let mut segments = Vec::new();
        for raw in raw_segments {
            let cleaned = strip_numbering(raw);
            if cleaned.is_empty() {
                continue;
            }
            segments.extend(self.split(&cleaned)?);
        }

        if segments.is_empty() {
            return Err(DecomposeError::Empty);
        }
        if let Some(expected) = total_count.filter(|&n| n != segments.len()) {
            warn!(
                expected,
                actual = segments.len(),
                "Thread segment count differs from generator total"
            );
        }
        if segments.len() > self.max_segments {
            return Err(DecomposeError::TooManySegments {
                count: segments.len(),
                max: self.max_segments,
            });
        }

        Ok(segments)
    }

    /// Final publishable text for each segment: marker on the first, ` i/N`
    /// on all, hashtags on the last where they fit.
    pub fn assemble(&self, segments: &[String], hashtags: &[String]) -> Vec<String> {
        let total = segments.len();
        segments
            .iter()
            .enumerate()
            .map(|(idx, segment)| {
                let mut text = if idx == 0 {
                    format!("{} {}", THREAD_MARKER, segment)
                } else {
                    segment.clone()
                };
                if idx + 1 == total {
                    append_hashtags(&mut text, hashtags, MAX_POST_CHARS - suffix_len(idx, total));
                }
                text.push_str(&format!(" {}/{}", idx + 1, total));
                text
            })
            .collect()
    }

    /// Final text of a standalone post.
    pub fn compose_single(&self, text: &str, hashtags: &[String]) -> Result<String, DecomposeError> {
        let mut body = normalize(text);
        if body.is_empty() {
            return Err(DecomposeError::Empty);
        }
        let len = body.chars().count();
        if len > MAX_POST_CHARS {
            return Err(DecomposeError::TooLong {
                len,
                max: MAX_POST_CHARS,
            });
        }
        append_hashtags(&mut body, hashtags, MAX_POST_CHARS);
        Ok(body)
    }
}

fn suffix_len(idx: usize, total: usize) -> usize {
    format!(" {}/{}", idx + 1, total).chars().count()
}

/// Append hashtags, skipping any that would push `text` past `limit`.
fn append_hashtags(text: &mut String, hashtags: &[String], limit: usize) {
    let mut len = text.chars().count();
    for tag in hashtags.iter().filter_map(|t| normalize_tag(t)) {
        let added = tag.chars().count() + 1;
        if len + added <= limit {
            text.push(' ');
            text.push_str(&tag);
            len += added;
        }
    }
}
