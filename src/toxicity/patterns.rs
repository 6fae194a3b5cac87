//! Pattern-based fallback analyzer.
//!
//! Always available and purely local, so a message can be classified even
//! when every network analyzer is down. Matches are reported as category
//! scores and merged exactly like any other analyzer output.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::toxicity::analyzer::{AnalyzerError, ToxicityAnalyzer};
use crate::toxicity::score::ToxicityScore;

pub const PATTERN_ANALYZER_NAME: &str = "patterns";

const SEVERE_SCORE: f64 = 0.95;
const TARGETED_SCORE: f64 = 0.70;
const LINK_SCORE: f64 = 0.65;
const NOISE_SCORE: f64 = 0.45;

macro_rules! pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

// ── Severe language ────────────────────────────────────────────────────────
pattern!(RE_SELF_HARM, r"(?i)\b(kys|kill yourself|neck yourself)\b");
pattern!(RE_SLUR, r"(?i)\b(n[i1]gg[ae]r|f[a4]gg[o0]t)\b");

// ── Targeted insults ───────────────────────────────────────────────────────
pattern!(RE_INSULT_AT_MENTION, r"(?i)\b(stupid|idiot|moron)\b.*@");
pattern!(RE_STFU, r"(?i)\bstfu\b");
pattern!(RE_DEMEANING, r"(?i)\b(trash|garbage|worthless)\b.*(\byou\b|@)");

// ── Harassment (only with a mention) ───────────────────────────────────────
pattern!(RE_DISMISSIVE, r"(?i)(shut up|stfu|go away|leave|nobody wants)");
pattern!(RE_HATE_YOU, r"(?i)(hate|despise|can't stand).*you");
pattern!(RE_YOU_SUCK, r"(?i)you.*(suck|terrible|awful|worst)");

// ── Links ──────────────────────────────────────────────────────────────────
pattern!(RE_INVITE, r"(?i)discord\.gg/[a-z0-9]+|discordapp\.com/invite/[a-z0-9]+");
pattern!(RE_SHORTENER, r"(?i)\b(bit\.ly|tinyurl\.com|t\.co|goo\.gl)/\S+");

// ── Noise ──────────────────────────────────────────────────────────────────
pattern!(RE_SYMBOL_RUN, r"[!@#$%^&*]{5,}");

fn matches(regex: &LazyLock<Option<Regex>>, text: &str) -> bool {
    regex.as_ref().is_some_and(|re| re.is_match(text))
}

/// Local regex/heuristic analyzer used as the last-resort scorer.
#[derive(Debug, Clone, Default)]
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scan; the async trait method delegates here.
    pub fn scan(&self, text: &str) -> ToxicityScore {
        let mut score = ToxicityScore::new(PATTERN_ANALYZER_NAME);

        if matches(&RE_SELF_HARM, text) {
            score.insert("self_harm", SEVERE_SCORE);
        }
        if matches(&RE_SLUR, text) {
            score.insert("identity_attack", SEVERE_SCORE);
        }

        if matches(&RE_INSULT_AT_MENTION, text) || matches(&RE_STFU, text) || matches(&RE_DEMEANING, text) {
            score.insert("insult", TARGETED_SCORE);
        }
        if is_targeted_harassment(text) {
            score.insert("harassment", TARGETED_SCORE);
        }

        if matches(&RE_INVITE, text) || matches(&RE_SHORTENER, text) {
            score.insert("suspicious_link", LINK_SCORE);
        }

        if is_spam(text) {
            score.insert("spam", NOISE_SCORE);
        }
        if is_caps_spam(text) {
            score.insert("caps", NOISE_SCORE);
        }

        score
    }
}

#[async_trait]
impl ToxicityAnalyzer for PatternAnalyzer {
    fn name(&self) -> &str {
        PATTERN_ANALYZER_NAME
    }

    async fn score(&self, text: &str) -> Result<ToxicityScore, AnalyzerError> {
        Ok(self.scan(text))
    }
}

fn has_mention(text: &str) -> bool {
    text.contains("<@") || text.contains("@everyone") || text.contains("@here")
}

fn is_targeted_harassment(text: &str) -> bool {
    has_mention(text)
        && (matches(&RE_DISMISSIVE, text) || matches(&RE_HATE_YOU, text) || matches(&RE_YOU_SUCK, text))
}

/// Repeated characters, repeated words, or a run of symbols.
fn is_spam(text: &str) -> bool {
    longest_char_run(text) >= 5 || longest_word_run(text) >= 4 || matches(&RE_SYMBOL_RUN, text)
}

fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<char> = None;
    for c in text.chars().flat_map(char::to_lowercase) {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

fn longest_word_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<String> = None;
    for word in text.split_whitespace().map(str::to_lowercase) {
        if previous.as_deref() == Some(word.as_str()) {
            current += 1;
        } else {
            current = 1;
            previous = Some(word);
        }
        longest = longest.max(current);
    }
    longest
}

/// Excessive capitals; shorter messages get a stricter ratio.
fn is_caps_spam(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 8 {
        return false;
    }
    let caps = letters.iter().filter(|c| c.is_uppercase()).count();
    let ratio = caps as f64 / letters.len() as f64;
    let threshold = if letters.len() < 20 { 0.8 } else { 0.7 };
    ratio > threshold
}
