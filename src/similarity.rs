//! Field similarity scoring for duplicate detection.
//!
//! Two layers: cheap normalized keys for exact-collision grouping, and a
//! weighted multi-field score for fuzzy matching. Name fields compare by
//! normalized Levenshtein distance, e-mail fields by case-folded
//! equality, phone fields by digit sequence, and person names optionally
//! by a compact phonetic key that forgives spelling variants.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::document::Document;

/// Canonical comparison key: Unicode-decomposed with combining marks
/// stripped (so `Zénith` and `Zenith` collide), case-folded, everything
/// but letters and digits dropped.
pub fn normalize_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Digit sequence of a phone-like field; `+33 1 23-45` and `0123 45`
/// compare by their digits only.
pub fn digits_key(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Compact phonetic key over the normalized form: consonant classes with
/// vowels elided, first letter kept, padded to four symbols.
pub fn phonetic_key(s: &str) -> String {
    let normalized = normalize_key(s);
    let mut coded = String::new();
    for c in normalized.chars() {
        let code = match c {
            'b' | 'f' | 'p' | 'v' => '1',
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => '2',
            'd' | 't' => '3',
            'l' => '4',
            'm' | 'n' => '5',
            'r' => '6',
            _ => '0',
        };
        coded.push(code);
    }
    let mut key = String::new();
    let mut chars = normalized.chars();
    let mut codes = coded.chars();
    if let (Some(first), Some(_)) = (chars.next(), codes.next()) {
        key.push(first);
    } else {
        return String::new();
    }
    for code in codes {
        if code != '0' {
            key.push(code);
        }
        if key.len() == 4 {
            break;
        }
    }
    while key.len() < 4 {
        key.push('0');
    }
    key
}

/// How one field pair is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    /// Case-folded equality (e-mail addresses).
    Exact,
    /// Normalized Levenshtein similarity (names, addresses).
    Name,
    /// Digit-sequence equality.
    Phone,
    /// Phonetic-key equality with a Levenshtein fallback.
    Phonetic,
}

impl Display for MatchMethod {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MatchMethod::Exact => write!(f, "exact"),
            MatchMethod::Name => write!(f, "name"),
            MatchMethod::Phone => write!(f, "phone"),
            MatchMethod::Phonetic => write!(f, "phonetic"),
        }
    }
}

/// One weighted field comparison of a similarity profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldWeight {
    pub field: String,
    pub weight: u32,
    pub method: MatchMethod,
}

impl FieldWeight {
    pub fn new(field: &str, weight: u32, method: MatchMethod) -> Self {
        FieldWeight {
            field: field.to_string(),
            weight,
            method,
        }
    }
}

/// A field pair that contributed to a match, kept for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReason {
    pub field: String,
    pub score: f64,
    pub method: MatchMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimilarityScore {
    /// Weighted average over the fields present on both documents, 0..=1.
    pub score: f64,
    pub reasons: Vec<MatchReason>,
}

const REASON_CUTOFF: f64 = 0.7;

pub fn field_similarity(a: &str, b: &str, method: MatchMethod) -> f64 {
    match method {
        MatchMethod::Exact => {
            if a.eq_ignore_ascii_case(b) {
                1.0
            } else {
                0.0
            }
        }
        MatchMethod::Name => strsim::normalized_levenshtein(
            &normalize_key(a),
            &normalize_key(b),
        ),
        MatchMethod::Phone => {
            let (da, db) = (digits_key(a), digits_key(b));
            if !da.is_empty() && da == db {
                1.0
            } else {
                0.0
            }
        }
        MatchMethod::Phonetic => {
            let (ka, kb) = (phonetic_key(a), phonetic_key(b));
            if !ka.is_empty() && ka == kb {
                0.8_f64.max(strsim::normalized_levenshtein(a, b))
            } else {
                strsim::normalized_levenshtein(&normalize_key(a), &normalize_key(b))
            }
        }
    }
}

/// Weighted similarity of two documents over a comparison profile.
///
/// Fields absent or empty on either side contribute neither score nor
/// weight, so sparse records are judged only on what they share.
pub fn document_similarity(a: &Document, b: &Document, profile: &[FieldWeight]) -> SimilarityScore {
    let mut total = 0.0;
    let mut weight_sum = 0u32;
    let mut reasons = Vec::new();
    for fw in profile {
        let (Some(va), Some(vb)) = (a.str_field(&fw.field), b.str_field(&fw.field)) else {
            continue;
        };
        if va.trim().is_empty() || vb.trim().is_empty() {
            continue;
        }
        let score = field_similarity(va, vb, fw.method);
        if score > REASON_CUTOFF {
            reasons.push(MatchReason {
                field: fw.field.clone(),
                score,
                method: fw.method,
            });
        }
        total += score * f64::from(fw.weight);
        weight_sum += fw.weight;
    }
    SimilarityScore {
        score: if weight_sum > 0 {
            total / f64::from(weight_sum)
        } else {
            0.0
        },
        reasons,
    }
}

/// Comparison profile for structures: legal name dominates, e-mail and
/// phone corroborate, street address breaks near-ties.
pub fn structure_profile() -> Vec<FieldWeight> {
    vec![
        FieldWeight::new("legalName", 40, MatchMethod::Name),
        FieldWeight::new("email", 30, MatchMethod::Exact),
        FieldWeight::new("phone", 20, MatchMethod::Phone),
        FieldWeight::new("address", 10, MatchMethod::Name),
    ]
}

/// Comparison profile for persons: e-mail dominates, names compare
/// phonetically, phone corroborates.
pub fn person_profile() -> Vec<FieldWeight> {
    vec![
        FieldWeight::new("email", 40, MatchMethod::Exact),
        FieldWeight::new("lastName", 25, MatchMethod::Phonetic),
        FieldWeight::new("firstName", 25, MatchMethod::Phonetic),
        FieldWeight::new("phone", 10, MatchMethod::Phone),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_case_and_punctuation() {
        assert_eq!(normalize_key("Le Zénith — Paris"), "lezenithparis");
        assert_eq!(normalize_key("  LE ZENITH, PARIS "), "lezenithparis");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn digits_key_ignores_formatting() {
        assert_eq!(digits_key("+33 (0)1 23-45"), "33012345");
        assert_eq!(digits_key("no digits"), "");
    }

    #[test]
    fn phonetic_key_forgives_spelling_variants() {
        // Vowel substitutions and trailing consonants beyond the fourth
        // symbol do not change the key.
        assert_eq!(phonetic_key("Martin"), phonetic_key("Marten"));
        assert_eq!(phonetic_key("Martin"), phonetic_key("Martins"));
        assert_ne!(phonetic_key("Martin"), phonetic_key("Dupont"));
        assert_eq!(phonetic_key(""), "");
    }

    #[test]
    fn identical_names_score_one() {
        assert_eq!(field_similarity("Zenith", "Zénith", MatchMethod::Name), 1.0);
        assert_eq!(
            field_similarity("a@b.example", "A@B.EXAMPLE", MatchMethod::Exact),
            1.0
        );
    }

    #[test]
    fn weighted_score_ignores_absent_fields() {
        let a = Document::new("s1")
            .with_field("legalName", "Blue Note Productions")
            .with_field("email", "hello@bluenote.example");
        let b = Document::new("s2")
            .with_field("legalName", "Blue Note Production")
            .with_field("email", "hello@bluenote.example")
            .with_field("phone", "01 23 45 67");

        let score = document_similarity(&a, &b, &structure_profile());
        // Phone is present on one side only: judged on name + email.
        assert!(score.score > 0.9, "score was {}", score.score);
        assert!(score
            .reasons
            .iter()
            .any(|r| r.field == "email" && r.score == 1.0));
    }

    #[test]
    fn unrelated_documents_score_low() {
        let a = Document::new("s1").with_field("legalName", "Blue Note Productions");
        let b = Document::new("s2").with_field("legalName", "Harbor Lights Agency");
        let score = document_similarity(&a, &b, &structure_profile());
        assert!(score.score < 0.5, "score was {}", score.score);
        assert!(score.reasons.is_empty());
    }
}
