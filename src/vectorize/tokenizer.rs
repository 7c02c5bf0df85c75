//! Word and n-gram tokenization shared by vocabulary extraction and
//! vectorization.
//!
//! Grounded in `_vocabulary.py`/`_vectorization.py`'s use of
//! `neuroquery.tokenization.Tokenizer`: lowercase word tokens, a stop-word
//! list, and 1-2 word n-grams. The exact upstream token/stopword set isn't
//! available in this crate's dependency stack (no NLTK data bundle), so this
//! is a compact, documented substitute rather than a byte-for-byte port.

use std::sync::OnceLock;

use regex::Regex;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "for", "from", "had",
    "has", "have", "how", "if", "in", "into", "is", "it", "its", "of", "on", "or", "our", "than",
    "that", "the", "their", "these", "this", "those", "to", "was", "we", "were", "which", "with",
    "within", "would",
];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z][a-zA-Z0-9'-]*").expect("valid word pattern"))
}

/// Lowercase word tokens, stop words dropped.
pub fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    word_regex()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// All n-grams of size `1..=max_n` over `words`, space-joined.
pub fn ngrams(words: &[String], max_n: usize) -> Vec<String> {
    let mut out = Vec::new();
    for n in 1..=max_n.max(1) {
        if n > words.len() {
            break;
        }
        for window in words.windows(n) {
            out.push(window.join(" "));
        }
    }
    out
}

/// Tokenize `text` into its 1..=max_n n-grams in one pass.
pub fn tokenize(text: &str, max_n: usize) -> Vec<String> {
    ngrams(&words(text), max_n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_stop_words_and_lowercases() {
        let w = words("The Cortex is Active");
        assert_eq!(w, vec!["cortex", "active"]);
    }

    #[test]
    fn ngrams_includes_unigrams_and_bigrams() {
        let w = words("brain stem cortex");
        let grams = ngrams(&w, 2);
        assert_eq!(
            grams,
            vec!["brain", "stem", "cortex", "brain stem", "stem cortex"]
        );
    }

    #[test]
    fn empty_text_yields_no_tokens() {
        assert!(tokenize("", 2).is_empty());
        assert!(tokenize("the", 2).is_empty(), "pure stop-word text yields nothing");
    }
}
