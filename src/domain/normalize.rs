//! Name normalization shared by the parser, the geometry index and the matcher
//!
//! Resort text and map data are maintained independently, so names are
//! compared after case folding, accent folding, punctuation stripping and
//! whitespace collapsing. All functions here are pure.

use crate::domain::conditions::SectorId;
use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens that carry no identity in trail names ("Miami Park" vs "Miami")
const GENERIC_TOKENS: [&str; 4] = ["piste", "trail", "park", "prk"];

/// Tokens stripped from sector labels before comparison
const SECTOR_FILLER: [&str; 7] = ["versant", "du", "des", "de", "la", "le", "l"];

/// Minimum token similarity for a sector label that is not an exact match
const SECTOR_MIN_SIMILARITY: f64 = 0.5;

/// Lowercase and remove diacritics (`"Épinettes"` → `"epinettes"`)
pub fn fold(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).flat_map(char::to_lowercase).collect()
}

/// Canonical comparison form: folded, punctuation replaced by spaces, whitespace collapsed.
///
/// `"Versant du Midi - Expert"` → `"versant du midi expert"`
pub fn normalize_name(s: &str) -> String {
    let folded = fold(s);
    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Drop the area suffix the resort appends to some names (`"Miami | Versant du Midi"`)
pub fn strip_area_suffix(name: &str) -> &str {
    match name.split_once('|') {
        Some((head, _)) => head.trim(),
        None => name.trim(),
    }
}

/// Token set of an already-normalized name, without generic filler words.
///
/// Falls back to the full token set when every token is generic.
pub fn token_set(normalized: &str) -> BTreeSet<&str> {
    let all: BTreeSet<&str> = normalized.split_whitespace().collect();
    let significant: BTreeSet<&str> =
        all.iter().copied().filter(|t| !GENERIC_TOKENS.contains(t)).collect();
    if significant.is_empty() {
        all
    } else {
        significant
    }
}

/// Jaccard similarity of two token sets. Two empty sets score 0.
pub fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// ASCII spelling of letters that do not decompose into base + accent
fn transliterate(ch: char) -> Option<&'static str> {
    match ch {
        'œ' => Some("oe"),
        'æ' => Some("ae"),
        'ß' => Some("ss"),
        'ø' => Some("o"),
        'ł' => Some("l"),
        'đ' => Some("d"),
        'þ' => Some("th"),
        _ => None,
    }
}

/// ASCII identifier fragment: `"Versant du Midi - Expert"` → `"versant_du_midi_expert"`
pub fn slug(name: &str) -> String {
    let normalized = normalize_name(name);
    let mut out = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if let Some(ascii) = transliterate(ch) {
            out.push_str(ascii);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Whether a day/night status cell reads as open
pub fn status_is_open(text: &str) -> bool {
    let n = normalize_name(text);
    n.split_whitespace().any(|t| t == "ouvert" || t == "ouverte" || t == "open")
}

/// Whether the status banner says the resort is closed
pub fn banner_is_closed(text: &str) -> bool {
    let n = normalize_name(text);
    n.split_whitespace().any(|t| t == "ferme" || t == "fermee" || t == "closed")
}

/// Result of resolving free-text sector label against the fixed sector set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorMatch {
    pub sector: SectorId,
    pub confidence: f64,
}

fn sector_core(normalized: &str) -> BTreeSet<&str> {
    normalized.split_whitespace().filter(|t| !SECTOR_FILLER.contains(t)).collect()
}

/// Resolve a sector label (`"Versant des Épinettes"`, `"Mont soleil"`, `"Epinettes"`).
///
/// Exact core match scores 1.0; otherwise the best token similarity above
/// `SECTOR_MIN_SIMILARITY`, earliest sector winning ties.
pub fn canonical_sector(label: &str) -> Option<SectorMatch> {
    let normalized = normalize_name(strip_area_suffix(label));
    let core = sector_core(&normalized);
    if core.is_empty() {
        return None;
    }

    let mut best: Option<SectorMatch> = None;
    for sector in SectorId::ALL {
        let canonical = normalize_name(sector.display_name());
        let canonical_core = sector_core(&canonical);
        if canonical_core == core {
            return Some(SectorMatch { sector, confidence: 1.0 });
        }
        let score = jaccard(&core, &canonical_core);
        if score >= SECTOR_MIN_SIMILARITY && best.map_or(true, |b| score > b.confidence) {
            best = Some(SectorMatch { sector, confidence: score });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_removes_accents() {
        assert_eq!(fold("Épinettes"), "epinettes");
        assert_eq!(fold("Côte Ouest"), "cote ouest");
    }

    #[test]
    fn test_normalize_name_collapses_punctuation_and_space() {
        assert_eq!(normalize_name("Versant du Midi - Expert"), "versant du midi expert");
        assert_eq!(normalize_name("  L'Épervier\t–  Haut "), "l epervier haut");
        assert_eq!(normalize_name("---"), "");
    }

    #[test]
    fn test_strip_area_suffix() {
        assert_eq!(strip_area_suffix("Miami | Versant du Midi"), "Miami");
        assert_eq!(strip_area_suffix(" Miami "), "Miami");
    }

    #[test]
    fn test_token_set_ignores_generic_tokens() {
        let set = token_set("miami park");
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["miami"]);
        let only_generic = token_set("park");
        assert_eq!(only_generic.len(), 1);
    }

    #[test]
    fn test_jaccard() {
        let a = token_set("grande coulee");
        let b = token_set("grande coulee est");
        assert!((jaccard(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Cowansville"), "cowansville");
        assert_eq!(slug("Versant du Midi - Expert"), "versant_du_midi_expert");
        assert_eq!(slug("Œil de lynx"), "oeil_de_lynx");
        assert_eq!(slug("Ærø Straße"), "aero_strasse");
        assert_ne!(slug("Œil de lynx"), slug("Il de lynx"));
    }

    #[test]
    fn test_status_text() {
        assert!(status_is_open("Ouvert"));
        assert!(status_is_open("OPEN"));
        assert!(!status_is_open("Fermé"));
        assert!(!status_is_open("-"));
        assert!(banner_is_closed("Fermé pour la saison"));
        assert!(!banner_is_closed("8h30 à 16h00"));
    }

    #[test]
    fn test_canonical_sector_variants() {
        let m = canonical_sector("Versant des Épinettes").unwrap();
        assert_eq!(m.sector, SectorId::Epinettes);
        assert_eq!(m.confidence, 1.0);

        assert_eq!(canonical_sector("Mont soleil").unwrap().sector, SectorId::MontSoleil);
        assert_eq!(canonical_sector("VERSANT  DE LA COTE-OUEST").unwrap().sector, SectorId::CoteOuest);
        assert_eq!(canonical_sector("Epinettes").unwrap().sector, SectorId::Epinettes);
        assert!(canonical_sector("Versant Nord").is_none());
        assert!(canonical_sector("").is_none());
    }
}
