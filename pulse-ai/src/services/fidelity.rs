//! Factual fidelity check between template and enhanced narratives
//!
//! Entities are numeric tokens and proper nouns. An enhancement is accepted
//! only if it contains exactly the same entity set as the template: nothing
//! dropped, nothing invented.

use std::collections::BTreeSet;

/// Capitalized words that are not proper nouns
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "back", "both", "but", "by", "down", "for", "from", "he",
    "in", "into", "is", "it", "its", "now", "of", "on", "or", "still", "that", "the", "their",
    "there", "they", "this", "to", "what", "with", "wow",
];

/// Tokens the narrative templates emit at sentence starts
const SENTENCE_WORDS: &[&str] = &[
    "all", "big", "crucial", "huge", "meanwhile", "season", "score", "so", "that's", "then",
    "through", "tied", "trailing", "leading", "while", "with",
];

fn trim_token(raw: &str) -> &str {
    raw.trim_matches(|c: char| !c.is_alphanumeric())
}

fn strip_possessive(token: &str) -> &str {
    token
        .strip_suffix("'s")
        .or_else(|| token.strip_suffix("\u{2019}s"))
        .unwrap_or(token)
}

fn is_stopword(word: &str) -> bool {
    let lower = word.to_lowercase();
    STOPWORDS.contains(&lower.as_str()) || SENTENCE_WORDS.contains(&lower.as_str())
}

/// Numeric tokens and proper nouns, normalized
pub fn extract_entities(text: &str) -> BTreeSet<String> {
    let mut entities = BTreeSet::new();

    for raw in text.split_whitespace() {
        let token = strip_possessive(trim_token(raw));
        if token.is_empty() {
            continue;
        }

        if token.chars().any(|c| c.is_ascii_digit()) {
            entities.insert(token.to_lowercase());
            continue;
        }

        // Hyphenated compounds ("Smith-Njigba") count as one name
        let starts_upper = token.chars().next().is_some_and(char::is_uppercase);
        if starts_upper && !is_stopword(token) {
            entities.insert(token.to_string());
        }
    }

    entities
}

/// Result of comparing two narratives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidelityReport {
    /// In the template but not the enhancement
    pub dropped: BTreeSet<String>,
    /// In the enhancement but not the template
    pub invented: BTreeSet<String>,
}

impl FidelityReport {
    pub fn is_faithful(&self) -> bool {
        self.dropped.is_empty() && self.invented.is_empty()
    }
}

pub fn verify(template: &str, enhanced: &str) -> FidelityReport {
    let expected = extract_entities(template);
    let actual = extract_entities(enhanced);
    FidelityReport {
        dropped: expected.difference(&actual).cloned().collect(),
        invented: actual.difference(&expected).cloned().collect(),
    }
}
