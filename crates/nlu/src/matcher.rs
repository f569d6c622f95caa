//! Deterministic Indian-name matcher
//!
//! Decides whether two spoken names refer to the same person. Evaluates a
//! fixed rule ladder on normalized forms and returns the highest-scoring hit:
//!
//! 1. exact equality                        → 1.00
//! 2. known-nickname table                  → 0.95
//! 3. honorific-stripped equality           → 0.93
//! 4. phonetic-key equality (h-insertion,
//!    s/sh, v/w, ksh/x digraphs)            → 0.90
//! 5. bounded edit distance, same initial   → 0.80
//!
//! Pure and synchronous; a pair scores in well under a millisecond.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::transliterate::transliterate;

/// Score at or above which two names are treated as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.85;

/// How a pair matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Nickname,
    Honorific,
    Phonetic,
    Typo,
}

/// A scored match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameMatch {
    pub score: f32,
    pub kind: MatchKind,
}

/// Honorifics stripped before comparison. Token-level, so "Rahul bhai"
/// and "bhai Rahul" both reduce to "rahul".
const HONORIFICS: &[&str] = &[
    "bhai", "bhaiya", "ji", "jee", "saab", "sahab", "sahib", "shri", "sri", "smt", "shrimati",
    "mr", "mrs", "ms", "uncle", "aunty", "didi", "dada",
];

/// Known nickname equivalences, both directions.
static NICKNAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let pairs: &[(&str, &str)] = &[
        ("raju", "rahul"),
        ("monu", "mohan"),
        ("sonu", "sohan"),
        ("pinky", "priyanka"),
        ("chhotu", "ashok"),
        ("guddu", "govind"),
        ("lakshmi", "laxmi"),
        ("vicky", "vikram"),
        ("babu", "babulal"),
        ("munna", "munesh"),
    ];
    let mut map = HashMap::new();
    for (a, b) in pairs {
        map.insert(*a, *b);
        map.insert(*b, *a);
    }
    map
});

/// Indian-name matcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameMatcher;

impl NameMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Score a candidate pair. `match(a, a) == 1.0`; symmetric up to the
    /// scoring bucket.
    pub fn score(&self, a: &str, b: &str) -> Option<NameMatch> {
        let na = normalize(a);
        let nb = normalize(b);
        if na.is_empty() || nb.is_empty() {
            return None;
        }

        if na == nb {
            return Some(NameMatch {
                score: 1.0,
                kind: MatchKind::Exact,
            });
        }

        let sa = strip_honorifics(&na);
        let sb = strip_honorifics(&nb);
        if sa.is_empty() || sb.is_empty() {
            return None;
        }

        if nicknames_match(&sa, &sb) {
            return Some(NameMatch {
                score: 0.95,
                kind: MatchKind::Nickname,
            });
        }

        if sa == sb {
            return Some(NameMatch {
                score: 0.93,
                kind: MatchKind::Honorific,
            });
        }

        if phonetic_key(&sa) == phonetic_key(&sb) {
            return Some(NameMatch {
                score: 0.90,
                kind: MatchKind::Phonetic,
            });
        }

        if typo_match(&sa, &sb) {
            return Some(NameMatch {
                score: 0.80,
                kind: MatchKind::Typo,
            });
        }

        None
    }

    /// Score against a threshold; `None` below it.
    pub fn matches(&self, a: &str, b: &str, threshold: f32) -> Option<NameMatch> {
        self.score(a, b).filter(|m| m.score >= threshold)
    }

    /// Convenience check at the default threshold.
    pub fn same_person(&self, a: &str, b: &str) -> bool {
        self.matches(a, b, DEFAULT_MATCH_THRESHOLD).is_some()
    }
}

/// Lowercase, transliterate Devanagari, keep alphanumerics, collapse
/// whitespace.
fn normalize(name: &str) -> String {
    let romanized = transliterate(name).to_lowercase();
    let mut out = String::with_capacity(romanized.len());
    let mut last_space = true;
    for c in romanized.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn strip_honorifics(normalized: &str) -> String {
    normalized
        .split_whitespace()
        .filter(|token| !HONORIFICS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn nicknames_match(a: &str, b: &str) -> bool {
    NICKNAMES.get(a).is_some_and(|&alias| alias == b)
}

/// Collapse the spelling variation classes that show up in ASR output for
/// Indian names: final-consonant /h/ insertion (Bharat/Bharath), s/sh and
/// v/w substitution, ksh/x digraphs, doubled vowels.
fn phonetic_key(name: &str) -> String {
    let mut key = name.replace("ksh", "x");
    key = key.replace('x', "ks");
    key = key.replace("ph", "f");
    key = key.replace("sh", "s");
    key = key.replace('w', "v");
    key = key.replace('z', "j");

    // collapse repeated characters ("raam" -> "ram")
    let mut collapsed = String::with_capacity(key.len());
    let mut prev = '\0';
    for c in key.chars() {
        if c != prev {
            collapsed.push(c);
        }
        prev = c;
    }

    // final-consonant /h/ insertion: "bharath" and "bharat" share a key
    if collapsed.len() > 3 && collapsed.ends_with('h') {
        let stem: String = collapsed.chars().take(collapsed.chars().count() - 1).collect();
        if stem.chars().last().is_some_and(|c| !"aeiou".contains(c)) {
            return stem;
        }
    }
    collapsed
}

fn typo_match(a: &str, b: &str) -> bool {
    let (ca, cb) = (a.chars().count(), b.chars().count());
    if a.chars().next() != b.chars().next() {
        return false;
    }
    if ca.abs_diff(cb) > 2 {
        return false;
    }
    let max_distance = if ca.min(cb) <= 4 { 1 } else { 2 };
    levenshtein(a, b) <= max_distance
}

/// Plain DP Levenshtein over chars; inputs are short names.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ac) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &bc) in b.iter().enumerate() {
            let cost = usize::from(ac != bc);
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(a: &str, b: &str) -> Option<NameMatch> {
        NameMatcher::new().score(a, b)
    }

    #[test]
    fn identity_is_exact() {
        let m = score("Rahul", "Rahul").unwrap();
        assert_eq!(m.score, 1.0);
        assert_eq!(m.kind, MatchKind::Exact);
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        let m = score("  RAHUL  Kumar ", "rahul kumar").unwrap();
        assert_eq!(m.kind, MatchKind::Exact);
    }

    #[test]
    fn devanagari_collapses_onto_roman() {
        let m = score("राहुल", "Rahul").unwrap();
        assert_eq!(m.kind, MatchKind::Exact);
    }

    #[test]
    fn nickname_table() {
        let m = score("Raju", "Rahul").unwrap();
        assert_eq!(m.kind, MatchKind::Nickname);
        assert_eq!(m.score, 0.95);
        // symmetric
        let m = score("Rahul", "Raju").unwrap();
        assert_eq!(m.kind, MatchKind::Nickname);
    }

    #[test]
    fn lakshmi_laxmi_variants() {
        let m = score("Lakshmi", "Laxmi").unwrap();
        assert!(m.score >= 0.90, "got {m:?}");
    }

    #[test]
    fn honorific_stripped() {
        let m = score("Rahul bhai", "Rahul").unwrap();
        assert_eq!(m.kind, MatchKind::Honorific);
        assert_eq!(m.score, 0.93);
        let m = score("Sharma ji", "Sharma").unwrap();
        assert_eq!(m.kind, MatchKind::Honorific);
    }

    #[test]
    fn final_h_insertion_is_phonetic() {
        let m = score("Bharat", "Bharath").unwrap();
        assert_eq!(m.kind, MatchKind::Phonetic);
        assert_eq!(m.score, 0.90);
    }

    #[test]
    fn s_sh_and_v_w_substitutions() {
        assert_eq!(score("Suresh", "Sures").unwrap().kind, MatchKind::Phonetic);
        assert_eq!(score("Vikram", "Wikram").unwrap().kind, MatchKind::Phonetic);
    }

    #[test]
    fn typo_within_distance() {
        let m = score("Ramesh", "Ramessh").unwrap();
        assert!(m.score >= 0.80);
        // short names use distance 1
        assert!(score("Ram", "Rem").is_some());
        assert!(score("Ram", "Rmme").is_none());
    }

    #[test]
    fn deepak_is_not_deepika_at_default_threshold() {
        let matcher = NameMatcher::new();
        if let Some(m) = matcher.score("Deepak", "Deepika") {
            assert!(m.score < DEFAULT_MATCH_THRESHOLD, "got {m:?}");
        }
        assert!(!matcher.same_person("Deepak", "Deepika"));
    }

    #[test]
    fn unrelated_names_do_not_match() {
        assert!(score("Rahul", "Suresh").is_none());
        assert!(score("Mohan", "Bharat").is_none());
    }

    #[test]
    fn symmetry_up_to_bucket() {
        let cases = [("Bharat", "Bharath"), ("Rahul bhai", "Rahul"), ("Ramesh", "Rameshh")];
        let matcher = NameMatcher::new();
        for (a, b) in cases {
            let forward = matcher.score(a, b).map(|m| m.score);
            let backward = matcher.score(b, a).map(|m| m.score);
            assert_eq!(forward, backward, "asymmetry for {a}/{b}");
        }
    }

    #[test]
    fn empty_inputs_never_match() {
        assert!(score("", "Rahul").is_none());
        assert!(score("bhai", "ji").is_none());
    }
}
