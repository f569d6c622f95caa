//! Spoken-number utilities
//!
//! Operators dictate phone numbers digit by digit, freely mixing Hindi and
//! English ("nau six saat do..."), and amounts with Indian multipliers
//! ("5 hazar", "2 lakh"). Everything here is deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::transliterate::transliterate;

/// Map one spoken token to a digit. Covers English, romanized Hindi, and a
/// few common ASR spellings.
fn digit_token(token: &str) -> Option<char> {
    Some(match token {
        "0" | "zero" | "shunya" | "sunya" | "oh" => '0',
        "1" | "one" | "ek" | "ik" => '1',
        "2" | "two" | "do" => '2',
        "3" | "three" | "teen" | "tin" => '3',
        "4" | "four" | "char" | "chaar" => '4',
        "5" | "five" | "panch" | "paanch" | "pach" => '5',
        "6" | "six" | "che" | "chhe" | "chha" | "cheh" => '6',
        "7" | "seven" | "saat" | "sat" => '7',
        "8" | "eight" | "aath" | "ath" => '8',
        "9" | "nine" | "nau" | "no" => '9',
        _ => return None,
    })
}

/// Parse a spoken-digit phone number out of free text.
///
/// Accepts contiguous digit runs ("9876543210"), spoken digits ("nau six
/// saat..."), and "double"/"triple" prefixes. Returns the digit string only
/// when the result lands in the valid 10-15 digit range.
pub fn parse_spoken_digits(text: &str) -> Option<String> {
    let romanized = transliterate(text).to_lowercase();
    let mut digits = String::new();
    let mut repeat: usize = 1;

    for raw in romanized.split(|c: char| !c.is_ascii_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            for c in raw.chars() {
                for _ in 0..repeat {
                    digits.push(c);
                }
                repeat = 1;
            }
            continue;
        }
        match raw {
            "double" => repeat = 2,
            "triple" => repeat = 3,
            token => {
                if let Some(d) = digit_token(token) {
                    for _ in 0..repeat {
                        digits.push(d);
                    }
                    repeat = 1;
                }
                // non-digit words reset any pending double/triple
                else {
                    repeat = 1;
                }
            }
        }
    }

    if (10..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

static AMOUNT_PATTERNS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:crore|cr|karod|karor)\b").unwrap(),
            10_000_000,
        ),
        (
            Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:lakh|lac|lakhs|lacs)\b").unwrap(),
            100_000,
        ),
        (
            Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:thousand|hazar|hazaar|k)\b").unwrap(),
            1_000,
        ),
        (
            Regex::new(r"(?i)(?:₹|rs\.?|rupees?|rupaye)\s*(\d+(?:,\d+)*(?:\.\d+)?)").unwrap(),
            1,
        ),
        (Regex::new(r"(\d+(?:,\d{2,3})*(?:\.\d+)?)").unwrap(), 1),
    ]
});

/// Parse a monetary amount from an entity string ("5 hazar", "₹1,200",
/// "1200.50"). Full precision is preserved; no rounding here.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let text = transliterate(text);
    for (pattern, multiplier) in AMOUNT_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&text) {
            let raw = caps.get(1)?.as_str().replace(',', "");
            let value: Decimal = raw.parse().ok()?;
            return Some(value * Decimal::from(*multiplier));
        }
    }
    None
}

/// Coerce a JSON entity into an amount: numbers pass through, strings go
/// through `parse_amount`.
pub fn coerce_amount(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64_retain)
            }
        }
        serde_json::Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Spoken-digit word form of a phone number in the session language, for
/// TTS friendliness ("9 8 7..." read as words).
pub fn digit_words(digits: &str, language: dukaan_voice_core::Language) -> String {
    use dukaan_voice_core::Language;

    let words: &[&str; 10] = match language {
        Language::Hindi | Language::Marathi => &[
            "shunya", "ek", "do", "teen", "char", "panch", "chhe", "saat", "aath", "nau",
        ],
        _ => &[
            "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
        ],
    };

    digits
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| words[d as usize])
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dukaan_voice_core::Language;

    #[test]
    fn contiguous_digits() {
        assert_eq!(
            parse_spoken_digits("number hai 9876543210"),
            Some("9876543210".to_string())
        );
    }

    #[test]
    fn mixed_hindi_english_digits() {
        assert_eq!(
            parse_spoken_digits("nau six saat do ek teen char five eight zero"),
            Some("9672134580".to_string())
        );
    }

    #[test]
    fn double_prefix() {
        assert_eq!(
            parse_spoken_digits("nau eight double seven six five four three two one"),
            Some("9877654321".to_string())
        );
    }

    #[test]
    fn too_short_rejected() {
        assert_eq!(parse_spoken_digits("nau six saat"), None);
        assert_eq!(parse_spoken_digits("call karo"), None);
    }

    #[test]
    fn amounts_with_multipliers() {
        assert_eq!(parse_amount("5 hazar"), Some(Decimal::from(5000)));
        assert_eq!(parse_amount("2 lakh"), Some(Decimal::from(200_000)));
        assert_eq!(parse_amount("1.5 lakh"), Some(Decimal::from(150_000)));
    }

    #[test]
    fn plain_and_symbol_amounts() {
        assert_eq!(parse_amount("₹1,200"), Some(Decimal::from(1200)));
        assert_eq!(parse_amount("Rs. 500"), Some(Decimal::from(500)));
        assert_eq!(parse_amount("300"), Some(Decimal::from(300)));
    }

    #[test]
    fn coerce_from_json() {
        assert_eq!(
            coerce_amount(&serde_json::json!(500)),
            Some(Decimal::from(500))
        );
        assert_eq!(
            coerce_amount(&serde_json::json!("5 hazar")),
            Some(Decimal::from(5000))
        );
        assert_eq!(coerce_amount(&serde_json::json!(null)), None);
    }

    #[test]
    fn digit_words_hindi() {
        assert_eq!(digit_words("98", Language::Hindi), "nau aath");
        assert_eq!(digit_words("05", Language::English), "zero five");
    }
}
