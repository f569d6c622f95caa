//! Language definitions
//!
//! Session language is a BCP-47 code, default Hindi. The set mirrors the
//! languages the response templates and yes/no word lists cover.

use serde::{Deserialize, Serialize};

/// Supported response languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Hindi,
    English,
    Tamil,
    Telugu,
    Marathi,
    Bengali,
    Gujarati,
    Kannada,
    Malayalam,
    Punjabi,
}

impl Language {
    /// BCP-47 code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Hindi => "hi",
            Self::English => "en",
            Self::Tamil => "ta",
            Self::Telugu => "te",
            Self::Marathi => "mr",
            Self::Bengali => "bn",
            Self::Gujarati => "gu",
            Self::Kannada => "kn",
            Self::Malayalam => "ml",
            Self::Punjabi => "pa",
        }
    }

    /// English display name, used in the extractor prompt.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Hindi => "Hindi",
            Self::English => "English",
            Self::Tamil => "Tamil",
            Self::Telugu => "Telugu",
            Self::Marathi => "Marathi",
            Self::Bengali => "Bengali",
            Self::Gujarati => "Gujarati",
            Self::Kannada => "Kannada",
            Self::Malayalam => "Malayalam",
            Self::Punjabi => "Punjabi",
        }
    }

    /// Resolve a code or spoken language name ("ta", "tamil", "तमिल" is not
    /// handled here — the extractor transliterates first).
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hi" | "hindi" | "hinglish" => Some(Self::Hindi),
            "en" | "english" => Some(Self::English),
            "ta" | "tamil" => Some(Self::Tamil),
            "te" | "telugu" => Some(Self::Telugu),
            "mr" | "marathi" => Some(Self::Marathi),
            "bn" | "bengali" | "bangla" => Some(Self::Bengali),
            "gu" | "gujarati" => Some(Self::Gujarati),
            "kn" | "kannada" => Some(Self::Kannada),
            "ml" | "malayalam" => Some(Self::Malayalam),
            "pa" | "punjabi" => Some(Self::Punjabi),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for lang in [
            Language::Hindi,
            Language::English,
            Language::Tamil,
            Language::Telugu,
            Language::Marathi,
            Language::Bengali,
            Language::Gujarati,
            Language::Kannada,
            Language::Malayalam,
            Language::Punjabi,
        ] {
            assert_eq!(Language::from_code(lang.code()), Some(lang));
        }
    }

    #[test]
    fn spoken_names_resolve() {
        assert_eq!(Language::from_code("Tamil"), Some(Language::Tamil));
        assert_eq!(Language::from_code("hinglish"), Some(Language::Hindi));
        assert_eq!(Language::from_code("klingon"), None);
    }
}
