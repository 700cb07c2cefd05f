//! Name index over the map dataset
//!
//! Built once from the loaded ways and never mutated; shared behind `Arc` and
//! read concurrently by the matcher. Two lookup structures:
//! - exact: normalized name → way slots
//! - postings: significant token → way slots, for fuzzy fallback

use crate::domain::geometry::{WayId, WayRecord};
use crate::domain::normalize::{jaccard, normalize_name, strip_area_suffix, token_set};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use tracing::debug;

type Slots = SmallVec<[u32; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// A way proposed for a query name, with its similarity score in [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub way: &'a WayRecord,
    pub score: f64,
    pub kind: MatchKind,
    /// Absolute difference between normalized name lengths (chars)
    pub length_delta: usize,
    /// The way's `ref` tag equals the queried trail number
    pub ref_match: bool,
}

#[derive(Debug, Default)]
pub struct GeoIndex {
    ways: Vec<WayRecord>,
    /// Normalized name per slot
    names: Vec<String>,
    exact: FxHashMap<String, Slots>,
    postings: FxHashMap<String, Slots>,
}

impl GeoIndex {
    pub fn build(ways: impl IntoIterator<Item = WayRecord>) -> Self {
        let mut index = GeoIndex::default();
        let mut skipped = 0usize;

        for way in ways {
            let normalized = normalize_name(strip_area_suffix(&way.name));
            if normalized.is_empty() {
                skipped += 1;
                continue;
            }
            let slot = index.ways.len() as u32;
            for token in token_set(&normalized) {
                index.postings.entry(token.to_string()).or_default().push(slot);
            }
            index.exact.entry(normalized.clone()).or_default().push(slot);
            index.names.push(normalized);
            index.ways.push(way);
        }

        debug!(ways = index.ways.len(), names = index.exact.len(), skipped, "geo_index_built");
        index
    }

    pub fn len(&self) -> usize {
        self.ways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ways.is_empty()
    }

    pub fn ways(&self) -> impl Iterator<Item = &WayRecord> {
        self.ways.iter()
    }

    pub fn get(&self, id: WayId) -> Option<&WayRecord> {
        self.ways.iter().find(|w| w.id == id)
    }

    /// Candidates for a free-text name, best first. Same as `lookup` without
    /// a trail number.
    pub fn lookup_by_name(&self, name: &str) -> Vec<Candidate<'_>> {
        self.lookup(name, None)
    }

    /// Candidates for a trail name and optional trail number, best first.
    ///
    /// Exact normalized-name hits come first (score 1.0): the way whose `ref`
    /// equals the number, then most nodes, then lowest id. Token-overlap hits
    /// follow, ordered by score, then `ref` equal to the number, then smallest
    /// name-length difference, then lowest id. Zero-overlap ways are omitted.
    pub fn lookup(&self, name: &str, number: Option<&str>) -> Vec<Candidate<'_>> {
        let normalized = normalize_name(strip_area_suffix(name));
        if normalized.is_empty() {
            return Vec::new();
        }
        let number = number.map(str::trim).filter(|n| !n.is_empty());
        let ref_match = |way: &WayRecord| number.is_some() && way.reference.as_deref().map(str::trim) == number;
        let query_len = normalized.chars().count();
        let delta = |slot: u32| self.names[slot as usize].chars().count().abs_diff(query_len);

        let exact_slots: &[u32] = self.exact.get(&normalized).map(|s| s.as_slice()).unwrap_or(&[]);
        let mut exact: Vec<Candidate<'_>> = exact_slots
            .iter()
            .map(|&slot| Candidate {
                way: &self.ways[slot as usize],
                score: 1.0,
                kind: MatchKind::Exact,
                length_delta: 0,
                ref_match: ref_match(&self.ways[slot as usize]),
            })
            .collect();
        exact.sort_by(|a, b| {
            b.ref_match
                .cmp(&a.ref_match)
                .then(b.way.nodes.len().cmp(&a.way.nodes.len()))
                .then(a.way.id.cmp(&b.way.id))
        });

        let query = token_set(&normalized);
        let mut slots: Vec<u32> = query
            .iter()
            .filter_map(|t| self.postings.get(*t))
            .flatten()
            .copied()
            .filter(|slot| !exact_slots.contains(slot))
            .collect();
        slots.sort_unstable();
        slots.dedup();

        let mut fuzzy: Vec<Candidate<'_>> = slots
            .into_iter()
            .filter_map(|slot| {
                let score = jaccard(&query, &token_set(&self.names[slot as usize]));
                let way = &self.ways[slot as usize];
                (score > 0.0).then(|| Candidate {
                    way,
                    score,
                    kind: MatchKind::Fuzzy,
                    length_delta: delta(slot),
                    ref_match: ref_match(way),
                })
            })
            .collect();
        fuzzy.sort_by(rank_fuzzy);

        exact.extend(fuzzy);
        exact
    }
}

fn rank_fuzzy(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.ref_match.cmp(&a.ref_match))
        .then(a.length_delta.cmp(&b.length_delta))
        .then(a.way.id.cmp(&b.way.id))
}
