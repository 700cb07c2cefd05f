//! Trail to map-way matching
//!
//! Exact normalized-name match first, token-overlap similarity second, no
//! match otherwise. Among equally good ways the one whose `ref` tag carries
//! the trail number wins. Deterministic for a given trail and index, so the entity
//! ids derived from the outcome stay stable across refresh cycles.

use crate::domain::conditions::{TrailKey, TrailRecord};
use crate::domain::geometry::{self, TrailEnrichment, WayId, WayRecord};
use crate::domain::normalize::{slug, strip_area_suffix};
use crate::infra::config::MatchPolicy;
use crate::services::geo_index::{Candidate, GeoIndex, MatchKind};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::debug;

/// A trail that found no acceptable way. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchWarning {
    pub trail_key: TrailKey,
    /// Best rejected candidate, if any way shared a token
    pub best_candidate: Option<(WayId, f64)>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentBatch {
    pub enrichments: BTreeMap<TrailKey, TrailEnrichment>,
    pub warnings: Vec<MatchWarning>,
}

impl EnrichmentBatch {
    pub fn matched(&self) -> usize {
        self.enrichments.values().filter(|e| e.is_matched()).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrailMatcher {
    policy: MatchPolicy,
}

impl TrailMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn match_trail(&self, trail: &TrailRecord, index: &GeoIndex) -> TrailEnrichment {
        self.resolve(trail, index).0
    }

    /// Match every trail and settle entity ids for the whole snapshot.
    ///
    /// A matched trail is exposed as `way_<id>` unless another trail in the
    /// same snapshot matched the same way; those fall back to the
    /// number-and-name id. Trails sharing a key collapse to the first row.
    pub fn enrich_all(&self, trails: &[TrailRecord], index: &GeoIndex) -> EnrichmentBatch {
        let mut batch = EnrichmentBatch::default();
        let mut fallback_ids: FxHashMap<TrailKey, String> = FxHashMap::default();

        for trail in trails {
            let key = trail.key();
            if batch.enrichments.contains_key(&key) {
                continue;
            }
            let (enrichment, warning) = self.resolve(trail, index);
            batch.warnings.extend(warning);
            fallback_ids.insert(key.clone(), fallback_entity_id(trail));
            batch.enrichments.insert(key, enrichment);
        }

        let mut way_uses: FxHashMap<WayId, usize> = FxHashMap::default();
        for way in batch.enrichments.values().filter_map(|e| e.way_id) {
            *way_uses.entry(way).or_default() += 1;
        }

        let mut taken: FxHashSet<String> = FxHashSet::default();
        for (key, enrichment) in batch.enrichments.iter_mut() {
            if let Some(way) = enrichment.way_id {
                if way_uses.get(&way).copied().unwrap_or(0) > 1 {
                    debug!(trail = %key, way = %way, "way_shared_by_trails");
                    if let Some(id) = fallback_ids.get(key) {
                        enrichment.entity_id = id.clone();
                    }
                }
            }
            // Suffix residual collisions in key order so the result is deterministic
            let base = enrichment.entity_id.clone();
            let mut n = 2;
            while !taken.insert(enrichment.entity_id.clone()) {
                enrichment.entity_id = format!("{}_{}", base, n);
                n += 1;
            }
        }

        debug!(
            trails = batch.enrichments.len(),
            matched = batch.matched(),
            unmatched = batch.warnings.len(),
            "trails_enriched"
        );
        batch
    }

    fn resolve(&self, trail: &TrailRecord, index: &GeoIndex) -> (TrailEnrichment, Option<MatchWarning>) {
        let key = trail.key();
        let candidates = index.lookup(&trail.name, trail.number.as_deref());
        let best = candidates.first().copied();

        match best.filter(|c| self.accepts(c)) {
            Some(candidate) => (enrichment_for(key, candidate.way, candidate.score), None),
            None => {
                debug!(
                    trail = %key,
                    best_score = best.map(|c| c.score).unwrap_or(0.0),
                    "trail_unmatched"
                );
                let mut enrichment = TrailEnrichment::unmatched(key.clone());
                enrichment.entity_id = fallback_entity_id(trail);
                let warning = MatchWarning {
                    trail_key: key,
                    best_candidate: best.map(|c| (c.way.id, c.score)),
                };
                (enrichment, Some(warning))
            }
        }
    }

    fn accepts(&self, candidate: &Candidate<'_>) -> bool {
        candidate.kind == MatchKind::Exact || candidate.score >= self.policy.accept_threshold()
    }
}

fn enrichment_for(trail_key: TrailKey, way: &WayRecord, confidence: f64) -> TrailEnrichment {
    TrailEnrichment {
        trail_key,
        entity_id: format!("way_{}", way.id),
        way_id: Some(way.id),
        confidence,
        centroid: geometry::centroid(&way.nodes),
        coordinates: Some(way.nodes.clone()),
        path_length_m: Some(geometry::path_length_m(&way.nodes)),
        bounds: geometry::bounds(&way.nodes),
    }
}

/// Identifier for a trail without a usable way: `"47_cowansville"`, or the
/// bare name slug when the row has no number.
pub fn fallback_entity_id(trail: &TrailRecord) -> String {
    let name = slug(strip_area_suffix(&trail.name));
    let name = if name.is_empty() { "trail".to_string() } else { name };
    match trail.number.as_deref().map(slug).filter(|n| !n.is_empty()) {
        Some(number) => format!("{}_{}", number, name),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conditions::{Difficulty, TrailKind};
    use crate::domain::geometry::LatLon;

    fn trail(number: Option<&str>, name: &str) -> TrailRecord {
        TrailRecord {
            number: number.map(str::to_string),
            name: name.to_string(),
            area: None,
            sector: None,
            kind: TrailKind::Trail,
            difficulty: Difficulty::Unknown,
            day_open: true,
            night_open: false,
        }
    }

    fn way(id: u64, name: &str, nodes: Vec<LatLon>) -> WayRecord {
        WayRecord { id: WayId(id), name: name.to_string(), reference: None, nodes }
    }

    fn index() -> GeoIndex {
        GeoIndex::build(vec![
            way(
                88421,
                "Versant du Midi - Expert",
                vec![LatLon::new(45.30, -72.65), LatLon::new(45.31, -72.65), LatLon::new(45.32, -72.65)],
            ),
            way(500, "Grande Coulée", vec![LatLon::new(45.29, -72.64)]),
            way(501, "Lièvre", vec![]),
        ])
    }

    fn matcher() -> TrailMatcher {
        TrailMatcher::new(MatchPolicy::default())
    }

    #[test]
    fn test_exact_match_populates_geometry() {
        let e = matcher().match_trail(&trail(Some("12"), "Versant du Midi - Expert"), &index());
        assert_eq!(e.way_id, Some(WayId(88421)));
        assert_eq!(e.confidence, 1.0);
        assert_eq!(e.coordinates.as_ref().map(Vec::len), Some(3));
        let c = e.centroid.unwrap();
        assert!((c.lat - 45.31).abs() < 1e-9);
        assert!(e.path_length_m.unwrap() > 2000.0);
        assert_eq!(e.entity_id, "way_88421");
    }

    #[test]
    fn test_no_match_falls_back_to_number_and_name() {
        let e = matcher().match_trail(&trail(Some("47"), "Cowansville"), &index());
        assert_eq!(e.way_id, None);
        assert_eq!(e.confidence, 0.0);
        assert!(e.coordinates.is_none());
        assert!(e.centroid.is_none());
        assert_eq!(e.entity_id, "47_cowansville");
    }

    #[test]
    fn test_same_name_ways_resolved_by_trail_number() {
        let ways = |first_ref: &str, second_ref: &str| {
            GeoIndex::build(vec![
                WayRecord { reference: Some(first_ref.to_string()), ..way(700, "Miami", vec![LatLon::new(45.30, -72.65)]) },
                WayRecord { reference: Some(second_ref.to_string()), ..way(701, "Miami", vec![LatLon::new(45.31, -72.66)]) },
            ])
        };
        let e = matcher().match_trail(&trail(Some("31"), "Miami"), &ways("30", "31"));
        assert_eq!(e.way_id, Some(WayId(701)));
        assert_eq!(e.confidence, 1.0);

        let e = matcher().match_trail(&trail(Some("31"), "Miami"), &ways("31", "30"));
        assert_eq!(e.way_id, Some(WayId(700)));
    }

    #[test]
    fn test_fuzzy_threshold() {
        // {grande, coulee} vs {grande, coulee, est} = 2/3
        let e = matcher().match_trail(&trail(None, "Grande Coulée Est"), &index());
        assert_eq!(e.way_id, Some(WayId(500)));
        assert!((e.confidence - 2.0 / 3.0).abs() < 1e-9);

        let strict = TrailMatcher::new(MatchPolicy::new(0.9).unwrap());
        let e = strict.match_trail(&trail(None, "Grande Coulée Est"), &index());
        assert_eq!(e.way_id, None);
        assert_eq!(e.entity_id, "grande_coulee_est");
    }

    #[test]
    fn test_degenerate_geometry() {
        let single = matcher().match_trail(&trail(None, "Grande Coulée"), &index());
        assert_eq!(single.centroid, Some(LatLon::new(45.29, -72.64)));
        assert_eq!(single.path_length_m, Some(0.0));

        let empty = matcher().match_trail(&trail(None, "Lièvre"), &index());
        assert_eq!(empty.way_id, Some(WayId(501)));
        assert_eq!(empty.centroid, None);
        assert_eq!(empty.coordinates, Some(vec![]));
        assert_eq!(empty.path_length_m, Some(0.0));
    }

    #[test]
    fn test_matching_is_deterministic() {
        let idx = index();
        let t = trail(Some("3"), "Grande Coulée Est");
        assert_eq!(matcher().match_trail(&t, &idx), matcher().match_trail(&t, &idx));
    }

    #[test]
    fn test_enrich_all_shared_way_uses_fallback_ids() {
        let trails = vec![
            trail(Some("1"), "Grande Coulée"),
            trail(Some("2"), "Grande Coulée Est"),
            trail(Some("47"), "Cowansville"),
            trail(Some("12"), "Versant du Midi - Expert"),
        ];
        let batch = matcher().enrich_all(&trails, &index());
        let ids: Vec<&str> = batch.enrichments.values().map(|e| e.entity_id.as_str()).collect();
        assert!(ids.contains(&"1_grande_coulee"));
        assert!(ids.contains(&"2_grande_coulee_est"));
        assert!(ids.contains(&"47_cowansville"));
        assert!(ids.contains(&"way_88421"));
        assert_eq!(batch.matched(), 3);
        assert_eq!(batch.warnings.len(), 1);
        assert_eq!(batch.warnings[0].trail_key, TrailKey::new("Cowansville", Some("47")));
    }

    #[test]
    fn test_enrich_all_ids_are_unique_and_stable() {
        let trails = vec![trail(None, "Tour"), trail(None, "Tour!"), trail(Some("5"), "Bleuets")];
        let first = matcher().enrich_all(&trails, &index());
        let second = matcher().enrich_all(&trails, &index());
        let ids = |b: &EnrichmentBatch| b.enrichments.values().map(|e| e.entity_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        // "Tour" and "Tour!" share a key and collapse
        assert_eq!(first.enrichments.len(), 2);
    }

    #[test]
    fn test_fallback_entity_id() {
        assert_eq!(fallback_entity_id(&trail(Some("47"), "Cowansville")), "47_cowansville");
        assert_eq!(fallback_entity_id(&trail(None, "Miami | Versant du Midi")), "miami");
        assert_eq!(fallback_entity_id(&trail(Some(" "), "Le Lièvre")), "le_lievre");
    }
}
