//! Table-driven Devanagari-to-Roman transliteration
//!
//! The extractor asks the LLM for Roman script only; this is the safety net
//! for names and products that come back in Devanagari anyway. Pure and
//! in-process, no external transliteration service.

/// True when the text contains any Devanagari code point.
pub fn contains_devanagari(text: &str) -> bool {
    text.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c))
}

/// Transliterate Devanagari runs into Roman phonetic form, leaving Latin
/// text untouched. Diacritics (nukta, chandrabindu) are dropped; anusvara
/// becomes `n`, visarga becomes `h`. The virama suppresses the inherent 'a'
/// of the preceding consonant, and the word-final inherent 'a' is deleted
/// the way spoken Hindi deletes it (राहुल → "rahul", not "rahula").
pub fn transliterate(text: &str) -> String {
    if !contains_devanagari(text) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    // Consonants carry an inherent 'a' unless followed by a matra or virama.
    let mut pending_a = false;

    for c in text.chars() {
        if let Some(roman) = consonant(c) {
            if pending_a {
                out.push('a');
            }
            out.push_str(roman);
            pending_a = true;
            continue;
        }

        if let Some(roman) = independent_vowel(c) {
            if pending_a {
                out.push('a');
                pending_a = false;
            }
            out.push_str(roman);
            continue;
        }

        if let Some(roman) = matra(c) {
            out.push_str(roman);
            pending_a = false;
            continue;
        }

        match c {
            '\u{094D}' => {
                // virama: suppress inherent vowel
                pending_a = false;
            }
            '\u{0902}' | '\u{0901}' => {
                // anusvara / chandrabindu
                if pending_a {
                    out.push('a');
                    pending_a = false;
                }
                out.push('n');
            }
            '\u{0903}' => {
                if pending_a {
                    out.push('a');
                    pending_a = false;
                }
                out.push('h');
            }
            '\u{093C}' => {
                // nukta: dropped
            }
            '\u{0966}'..='\u{096F}' => {
                // word boundary for schwa purposes: drop the pending vowel
                pending_a = false;
                let digit = (c as u32 - 0x0966) as u8;
                out.push((b'0' + digit) as char);
            }
            _ => {
                // non-Devanagari ends the word: final schwa is deleted
                pending_a = false;
                out.push(c);
            }
        }
    }

    out
}

fn consonant(c: char) -> Option<&'static str> {
    Some(match c {
        'क' => "k",
        'ख' => "kh",
        'ग' => "g",
        'घ' => "gh",
        'ङ' => "n",
        'च' => "ch",
        'छ' => "chh",
        'ज' => "j",
        'झ' => "jh",
        'ञ' => "n",
        'ट' => "t",
        'ठ' => "th",
        'ड' => "d",
        'ढ' => "dh",
        'ण' => "n",
        'त' => "t",
        'थ' => "th",
        'द' => "d",
        'ध' => "dh",
        'न' => "n",
        'प' => "p",
        'फ' => "ph",
        'ब' => "b",
        'भ' => "bh",
        'म' => "m",
        'य' => "y",
        'र' => "r",
        'ल' => "l",
        'व' => "v",
        'श' => "sh",
        'ष' => "sh",
        'स' => "s",
        'ह' => "h",
        'क़' => "q",
        'ख़' => "kh",
        'ग़' => "g",
        'ज़' => "z",
        'ड़' => "r",
        'ढ़' => "rh",
        'फ़' => "f",
        _ => return None,
    })
}

fn independent_vowel(c: char) -> Option<&'static str> {
    Some(match c {
        'अ' => "a",
        'आ' => "aa",
        'इ' => "i",
        'ई' => "ee",
        'उ' => "u",
        'ऊ' => "oo",
        'ऋ' => "ri",
        'ए' => "e",
        'ऐ' => "ai",
        'ओ' => "o",
        'औ' => "au",
        'ऑ' => "o",
        _ => return None,
    })
}

fn matra(c: char) -> Option<&'static str> {
    Some(match c {
        '\u{093E}' => "a",  // ा
        '\u{093F}' => "i",  // ि
        '\u{0940}' => "i",  // ी
        '\u{0941}' => "u",  // ु
        '\u{0942}' => "u",  // ू
        '\u{0943}' => "ri", // ृ
        '\u{0947}' => "e",  // े
        '\u{0948}' => "ai", // ै
        '\u{094B}' => "o",  // ो
        '\u{094C}' => "au", // ौ
        '\u{0949}' => "o",  // ॉ
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_passes_through() {
        assert_eq!(transliterate("Rahul"), "Rahul");
        assert_eq!(transliterate("2 kg chawal"), "2 kg chawal");
    }

    #[test]
    fn common_names() {
        assert_eq!(transliterate("राहुल"), "rahul");
        assert_eq!(transliterate("भरत"), "bharat");
        assert_eq!(transliterate("सुरेश"), "suresh");
        assert_eq!(transliterate("मोहन"), "mohan");
    }

    #[test]
    fn virama_suppresses_inherent_vowel() {
        // lakshmi: the halant joins k and sh
        assert_eq!(transliterate("लक्ष्मी"), "lakshmi");
    }

    #[test]
    fn anusvara_becomes_n() {
        assert_eq!(transliterate("चंदन"), "chandan");
    }

    #[test]
    fn devanagari_digits() {
        assert_eq!(transliterate("९८७"), "987");
    }

    #[test]
    fn mixed_script() {
        assert_eq!(transliterate("राहुल ka balance"), "rahul ka balance");
    }
}
