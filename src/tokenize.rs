//! Word extraction for token propagation.
//!
//! External tokenizers may hand the store any `(word, position, temporal)`
//! sequence; this module is the bundled convenience that matches how the
//! upstream collectors split text: word characters at word boundaries, with
//! 0-based positions and a lowercase form for search.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::propagate::Token;

/// Single-word temporal markers: language that points at WHEN something
/// might happen (urgency terms, relative timeframes, deadline verbs, month
/// and quarter names).
const TEMPORAL_MARKERS: &[&str] = &[
    // urgency
    "soon", "shortly", "imminent", "imminently", "immediately", "now",
    // relative
    "today", "tomorrow", "tonight", "yesterday", "eventually", "someday",
    // deadline
    "by", "before", "until", "deadline", "due", "expires", "ends", "closes", "concludes",
    // calendar
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "q1", "q2", "q3", "q4", "h1", "h2",
];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").expect("word regex is valid"))
}

fn marker_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| TEMPORAL_MARKERS.iter().copied().collect())
}

/// Whether a lowercased word is a recognized temporal marker.
pub fn is_temporal_marker(word_lower: &str) -> bool {
    marker_set().contains(word_lower)
}

/// Split text into word tokens with 0-based positions and temporal flags.
pub fn tokenize(text: &str) -> Vec<Token> {
    word_re()
        .find_iter(text)
        .enumerate()
        .map(|(position, m)| {
            let text = m.as_str().to_string();
            let lower = text.to_lowercase();
            Token {
                is_temporal_marker: is_temporal_marker(&lower),
                text,
                position: position as i64,
            }
        })
        .collect()
}
