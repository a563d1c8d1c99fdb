//! Heuristic quality scoring for generated content.
//!
//! Scoring never rejects anything by itself. The orchestrator applies a
//! [`QualityPolicy`] to decide whether to keep a candidate or regenerate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::Persona;

const W_ENGAGEMENT: f64 = 0.25;
const W_READABILITY: f64 = 0.15;
const W_UNIQUENESS: f64 = 0.20;
const W_PERSONA_FIT: f64 = 0.20;
const W_VIRAL: f64 = 0.15;
const W_TREND: f64 = 0.05;

/// Sub-scores below this get a feedback line
const FEEDBACK_THRESHOLD: f64 = 0.6;

const CLICHES: &[&str] = &[
    "game changer",
    "game-changer",
    "at the end of the day",
    "think outside the box",
    "low-hanging fruit",
    "paradigm shift",
    "to the moon",
    "this is huge",
    "you won't believe",
    "let that sink in",
    "in today's world",
    "synergy",
];

const DEFAULT_TRENDING: &[&str] = &[
    "ai", "bitcoin", "etf", "layer 2", "regulation", "security", "open source", "defi",
    "privacy", "stablecoin",
];

const CALL_TO_ACTION: &[&str] = &["reply", "share", "thoughts", "comment", "follow", "bookmark"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

pub fn grade_for(overall: u8) -> Grade {
    match overall {
        90.. => Grade::A,
        80..=89 => Grade::B,
        70..=79 => Grade::C,
        60..=69 => Grade::D,
        _ => Grade::F,
    }
}

/// Snapshot stored alongside each post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityScore {
    pub overall: u8,
    pub engagement: f64,
    pub readability: f64,
    pub uniqueness: f64,
    pub persona_fit: f64,
    pub viral_potential: f64,
    pub trend_relevance: f64,
    pub grade: Grade,
    #[serde(default)]
    pub feedback: Vec<String>,
}

/// Acceptance policy applied by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPolicy {
    pub min_score: u8,
    /// Total generation attempts per unit, including the first
    pub max_attempts: u32,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_score: 80,
            max_attempts: 3,
        }
    }
}

impl QualityPolicy {
    pub fn accepts(&self, score: &QualityScore) -> bool {
        score.overall >= self.min_score
    }
}

/// Stateless scorer. Holds only the trending keyword list.
#[derive(Debug, Clone)]
pub struct QualityGate {
    trending: Vec<String>,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(DEFAULT_TRENDING.iter().map(|s| s.to_string()).collect())
    }
}

impl QualityGate {
    pub fn new(trending: Vec<String>) -> Self {
        Self {
            trending: trending.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn score(&self, content: &str, hashtags: &[String], persona: &Persona) -> QualityScore {
        let lower = content.to_lowercase();
        let words = words(&lower);

        let engagement = engagement(content, &lower, &words);
        let readability = readability(content, &words);
        let uniqueness = uniqueness(&lower, &words);
        let persona_fit = persona_fit(&lower, persona);
        let viral_potential = viral(content, hashtags);
        let trend_relevance = self.trend(&lower, hashtags);

        let weighted = W_ENGAGEMENT * engagement
            + W_READABILITY * readability
            + W_UNIQUENESS * uniqueness
            + W_PERSONA_FIT * persona_fit
            + W_VIRAL * viral_potential
            + W_TREND * trend_relevance;
        let overall = (weighted * 100.0).round().clamp(0.0, 100.0) as u8;

        let mut feedback = Vec::new();
        let checks = [
            (engagement, "Low engagement: address the reader or ask a question"),
            (readability, "Hard to read: shorten sentences or adjust length"),
            (uniqueness, "Repetitive or cliché wording"),
            (persona_fit, "Does not sound like the persona"),
            (viral_potential, "Weak hook or invalid hashtags"),
            (trend_relevance, "Not tied to anything currently trending"),
        ];
        for (value, message) in checks {
            if value < FEEDBACK_THRESHOLD {
                feedback.push(message.to_string());
            }
        }

        QualityScore {
            overall,
            engagement,
            readability,
            uniqueness,
            persona_fit,
            viral_potential,
            trend_relevance,
            grade: grade_for(overall),
            feedback,
        }
    }

    fn trend(&self, lower: &str, hashtags: &[String]) -> f64 {
        let tags: Vec<String> = hashtags
            .iter()
            .map(|t| t.trim_start_matches('#').to_lowercase())
            .collect();
        let hits = self
            .trending
            .iter()
            .filter(|k| lower.contains(k.as_str()) || tags.iter().any(|t| t == &k.replace(' ', "")))
            .count();
        clamp01(0.2 + 0.4 * hits as f64)
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn words(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect()
}

pub(crate) fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x1F300..=0x1FAFF | 0x2600..=0x27BF)
}

fn engagement(content: &str, lower: &str, words: &[&str]) -> f64 {
    let mut score: f64 = 0.2;
    if words.iter().any(|w| matches!(*w, "you" | "your" | "you're" | "yours")) {
        score += 0.3;
    }
    if content.contains('?') {
        score += 0.3;
    }
    let emojis = content.chars().filter(|c| is_emoji(*c)).count();
    match emojis {
        0 => {}
        1 => score += 0.2,
        n => score -= 0.15 * (n - 1) as f64,
    }
    if CALL_TO_ACTION.iter().any(|c| lower.contains(c)) {
        score += 0.2;
    }
    clamp01(score)
}

fn readability(content: &str, words: &[&str]) -> f64 {
    let len = content.chars().count();
    if words.is_empty() {
        return 0.0;
    }

    let mut score = match len {
        0..=29 => 0.2,
        30..=49 => 0.4,
        _ => 0.5,
    };

    let sentences = content
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let words_per_sentence = words.len() as f64 / sentences as f64;
    if words_per_sentence <= 20.0 {
        score += 0.3;
    } else if words_per_sentence <= 30.0 {
        score += 0.1;
    }

    let avg_word = words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
    if avg_word <= 6.0 {
        score += 0.2;
    }
    clamp01(score)
}

fn uniqueness(lower: &str, words: &[&str]) -> f64 {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in words.iter().copied().filter(|w| w.chars().count() > 3) {
        *counts.entry(w).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    let repetition = if total == 0 {
        0.0
    } else {
        1.0 - counts.len() as f64 / total as f64
    };

    let cliches = CLICHES.iter().filter(|c| lower.contains(*c)).count();
    clamp01(1.0 - repetition * 1.5 - 0.25 * cliches as f64)
}

fn persona_fit(lower: &str, persona: &Persona) -> f64 {
    if persona.markers.is_empty() {
        return 0.7;
    }
    let hits = persona
        .markers
        .iter()
        .filter(|m| lower.contains(&m.to_lowercase()))
        .count();
    let needed = persona.markers.len().min(3);
    clamp01(0.2 + 0.8 * hits as f64 / needed as f64)
}

/// Rejects URLs, pure numbers and unpronounceable tokens
pub fn is_valid_hashtag(tag: &str) -> bool {
    let body = tag.trim().trim_start_matches('#');
    if body.is_empty() {
        return false;
    }
    let lower = body.to_lowercase();
    if lower.contains("://") || lower.starts_with("www") || lower.starts_with("http") || lower.contains('.') {
        return false;
    }
    if !body.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return false;
    }
    if body.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let letters: Vec<char> = lower.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let is_vowel = |c: &char| "aeiouy".contains(*c);
    if letters.len() > 3 && !letters.iter().any(is_vowel) {
        return false;
    }
    let mut run = 0;
    for c in &letters {
        if is_vowel(c) {
            run = 0;
        } else {
            run += 1;
            if run >= 5 {
                return false;
            }
        }
    }
    true
}

fn viral(content: &str, hashtags: &[String]) -> f64 {
    let mut score: f64 = 0.1;
    let valid = hashtags.iter().filter(|t| is_valid_hashtag(t)).count();
    let invalid = hashtags.len() - valid;
    if (1..=3).contains(&valid) {
        score += 0.4;
    } else if valid > 3 {
        score += 0.1;
    }
    score -= 0.2 * invalid as f64;

    if content.chars().any(|c| c.is_ascii_digit()) {
        score += 0.2;
    }
    let first_sentence = content.split(['.', '!', '?', '\n']).next().unwrap_or("");
    if !first_sentence.trim().is_empty() && first_sentence.chars().count() <= 60 {
        score += 0.2;
    }
    if content.contains('!') {
        score += 0.1;
    }
    clamp01(score)
}
