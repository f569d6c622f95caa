//! Natural-language understanding for shop-floor Hinglish
//!
//! Everything deterministic lives here: the Indian-name matcher, the
//! table-driven Devanagari transliterator, spoken-number parsing, and
//! natural-language time phrases. The intent extractor wraps one
//! chat-completion call with the post-processing contract that makes its
//! output reliable.

pub mod extractor;
pub mod matcher;
pub mod numbers;
pub mod payload;
pub mod prompt;
pub mod timeparse;
pub mod transliterate;

pub use extractor::{ExtractedCommand, IntentExtractor};
pub use matcher::{MatchKind, NameMatch, NameMatcher, DEFAULT_MATCH_THRESHOLD};
pub use numbers::{coerce_amount, digit_words, parse_amount, parse_spoken_digits};
pub use payload::{build_payload, detects_back_reference};
pub use timeparse::parse_when;
pub use transliterate::{contains_devanagari, transliterate};

use thiserror::Error;

/// NLU errors
#[derive(Error, Debug)]
pub enum NluError {
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid time phrase: {0}")]
    TimePhrase(String),
}
