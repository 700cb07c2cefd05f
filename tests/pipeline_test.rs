//! End-to-end refresh pipeline tests against a saved conditions page

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ski_conditions::domain::conditions::{Category, Difficulty, Field, ParseWarning, ResortStatus, TrailKind};
use ski_conditions::domain::{LatLon, RawDocument, SectorId, TrailKey, WayId, WayRecord};
use ski_conditions::infra::{MatchPolicy, Metrics, RefreshPolicy};
use ski_conditions::io::{FetchError, PageSource};
use ski_conditions::services::{
    GeoIndex, GeometryProvider, PageParser, RefreshCoordinator, RefreshError, StaticWays, TrailMatcher,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PAGE: &str = include_str!("fixtures/conditions.html");

/// Serves the fixture page until switched into a failure mode
#[derive(Default)]
struct FixtureSource {
    failing: AtomicBool,
    hanging: AtomicBool,
}

#[async_trait]
impl PageSource for FixtureSource {
    async fn fetch(&self) -> Result<RawDocument, FetchError> {
        if self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status { code: 503 });
        }
        Ok(RawDocument::new(PAGE, Utc::now()))
    }

    fn name(&self) -> &str {
        "fixture"
    }
}

fn ways() -> Vec<WayRecord> {
    vec![
        WayRecord {
            id: WayId(88421),
            name: "Versant du Midi - Expert".to_string(),
            reference: Some("12".to_string()),
            nodes: vec![LatLon::new(45.300, -72.650), LatLon::new(45.305, -72.652), LatLon::new(45.310, -72.654)],
        },
        WayRecord {
            id: WayId(500),
            name: "Grande Coulée".to_string(),
            reference: None,
            nodes: vec![LatLon::new(45.290, -72.640), LatLon::new(45.295, -72.642)],
        },
        WayRecord {
            id: WayId(501),
            name: "Lièvre".to_string(),
            reference: None,
            nodes: vec![LatLon::new(45.280, -72.630)],
        },
    ]
}

fn coordinator(source: Arc<FixtureSource>, policy: RefreshPolicy) -> RefreshCoordinator {
    RefreshCoordinator::new(
        source,
        Arc::new(GeometryProvider::from_index(GeoIndex::build(ways()))),
        TrailMatcher::new(MatchPolicy::default()),
        policy,
        Arc::new(Metrics::new()),
    )
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-02-14T12:45:00Z").unwrap().with_timezone(&Utc)
}

#[test]
fn test_fixture_parses_headline_metrics() {
    let snapshot = PageParser::new().parse(RawDocument::new(PAGE, t0())).unwrap();

    assert_eq!(snapshot.status, ResortStatus::Open);
    assert_eq!(snapshot.hours_text, "Ouvert de 8h30 à 22h00");
    assert_eq!(snapshot.date_label.as_deref(), Some("Samedi 14 février"));
    assert_eq!(snapshot.updated_label.as_deref(), Some("14 février à 7h45"));

    assert_eq!(snapshot.snow.snow_24h, Field::Value(12.5));
    assert_eq!(snapshot.snow.snow_48h, Field::Value(20.0));
    assert_eq!(snapshot.snow.snow_7d, Field::Value(41.0));
    assert_eq!(snapshot.snow.snow_total, Field::Value(312.0));
    assert_eq!(snapshot.snow.surface.as_deref(), Some("Hard pack"));
    assert_eq!(snapshot.snow.base.as_deref(), Some("Durcie"));
    assert_eq!(snapshot.snow.coverage_pct, Field::Value(85.0));

    let trails = snapshot.counts.trails.day.value().unwrap();
    assert_eq!((trails.open, trails.total), (80, 145));
    let lifts = snapshot.counts.lifts.night.value().unwrap();
    assert_eq!((lifts.open, lifts.total), (3, 9));
    assert!(snapshot.counts.glades.night.is_missing());
}

#[test]
fn test_fixture_always_has_seven_sectors() {
    let snapshot = PageParser::new().parse(RawDocument::new(PAGE, t0())).unwrap();

    assert_eq!(snapshot.terrain.len(), 7);
    let sectors: Vec<SectorId> = snapshot.terrain.iter().map(|t| t.sector).collect();
    assert_eq!(sectors, SectorId::ALL.to_vec());
    assert_eq!(snapshot.sector(SectorId::Village).unwrap().open_pct, Field::Value(100.0));
    assert!(snapshot.sector(SectorId::Cantons).unwrap().open_pct.is_missing());
    assert!(snapshot.sector(SectorId::CoteOuest).unwrap().open_pct.is_missing());
}

#[test]
fn test_fixture_rows_and_diagnostics() {
    let snapshot = PageParser::new().parse(RawDocument::new(PAGE, t0())).unwrap();

    let names: Vec<&str> = snapshot.trails.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Cowansville", "Versant du Midi - Expert", "Grande Coulée Est", "Sentier des Pins", "Lièvre"]
    );
    let cowansville = &snapshot.trails[0];
    assert_eq!(cowansville.number.as_deref(), Some("47"));
    assert_eq!(cowansville.sector, Some(SectorId::Midi));
    assert_eq!(cowansville.difficulty, Difficulty::Intermediate);
    assert!(cowansville.day_open && !cowansville.night_open);
    assert_eq!(snapshot.trails[4].kind, TrailKind::Glade);
    assert_eq!(snapshot.trails[3].sector, None);

    assert_eq!(snapshot.lifts.len(), 2);
    assert_eq!(snapshot.lifts[0].realtime.as_deref(), Some("Attente 5 min"));

    assert_eq!(snapshot.diagnostics.rows_skipped, 1);
    assert!(snapshot
        .diagnostics
        .warnings
        .iter()
        .any(|w| matches!(w, ParseWarning::UnknownSector { label } if label == "Secteur Inconnu")));
}

#[test]
fn test_fixture_facility_rows() {
    let snapshot = PageParser::new().parse(RawDocument::new(PAGE, t0())).unwrap();

    let parks: Vec<_> = snapshot.facilities_in(Category::Parks).collect();
    assert_eq!(parks.len(), 2);
    assert_eq!(parks[0].number.as_deref(), Some("P2"));
    assert_eq!(parks[0].location.as_deref(), Some("Versant des Cantons"));
    assert_eq!(parks[0].difficulty, Difficulty::Other("moyen".to_string()));
    assert!(parks[0].day_open && parks[0].night_open);
    assert_eq!(parks[1].location, None);

    let hiking: Vec<_> = snapshot.facilities_in(Category::Hiking).collect();
    assert_eq!(hiking.len(), 1);
    assert_eq!(hiking[0].difficulty, Difficulty::Intermediate);

    assert!(snapshot.facilities_in(Category::Snowshoe).all(|f| !f.day_open && !f.night_open));

    let parking: Vec<&str> = snapshot.facilities_in(Category::Parking).map(|f| f.name.as_str()).collect();
    assert_eq!(parking, vec!["P1 Chalet principal", "P5 Débordement"]);
    assert!(snapshot.facilities_in(Category::Parking).all(|f| f.area.as_deref() == Some("Base du Village")));

    let parks_count = snapshot.counts.parks.day.value().unwrap();
    assert_eq!((parks_count.open, parks_count.total), (2, 4));
    // Facility rows never become matchable trails
    assert_eq!(snapshot.trails.len(), 5);
}

#[tokio::test]
async fn test_cycle_enriches_trails() {
    let c = coordinator(Arc::new(FixtureSource::default()), RefreshPolicy::default());
    let outcome = c.refresh_at(t0()).await;
    assert!(outcome.success, "{:?}", outcome.error);
    let snapshot = outcome.snapshot.unwrap();

    let cowansville = snapshot.enrichment(&TrailKey::new("Cowansville", Some("47"))).unwrap();
    assert_eq!(cowansville.way_id, None);
    assert_eq!(cowansville.confidence, 0.0);
    assert!(cowansville.coordinates.is_none());
    assert_eq!(cowansville.entity_id, "47_cowansville");

    let expert = snapshot.enrichment(&TrailKey::new("Versant du Midi - Expert", Some("12"))).unwrap();
    assert_eq!(expert.way_id, Some(WayId(88421)));
    assert_eq!(expert.confidence, 1.0);
    assert!(expert.centroid.is_some());
    assert_eq!(expert.coordinates.as_ref().map(Vec::len), Some(3));
    assert_eq!(expert.entity_id, "way_88421");

    let coulee = snapshot.enrichment(&TrailKey::new("Grande Coulée Est", Some("3"))).unwrap();
    assert_eq!(coulee.way_id, Some(WayId(500)));
    assert!(coulee.confidence >= 0.5 && coulee.confidence < 1.0);

    assert_eq!(c.entities().len(), snapshot.enrichments.len());
}

#[tokio::test]
async fn test_geometry_loaded_lazily_from_source() {
    let metrics = Arc::new(Metrics::new());
    let geometry = Arc::new(GeometryProvider::new(Arc::new(StaticWays(ways())), metrics.clone()));
    let c = RefreshCoordinator::new(
        Arc::new(FixtureSource::default()),
        geometry.clone(),
        TrailMatcher::new(MatchPolicy::default()),
        RefreshPolicy::default(),
        metrics.clone(),
    );
    assert!(geometry.current().is_none());

    // The first cycle publishes unmatched trails while the index loads
    assert!(c.refresh_at(t0()).await.success);
    assert_eq!(metrics.report().trails_matched, 0);
    while geometry.is_loading() {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    assert_eq!(geometry.current().map(|i| i.len()), Some(3));

    assert!(c.refresh_at(t0() + Duration::minutes(5)).await.success);
    let report = metrics.report();
    assert_eq!(report.geometry_loads, 1);
    assert_eq!(report.trails_total, 5);
    assert_eq!(report.trails_matched, 3);
}

#[tokio::test]
async fn test_identity_stable_across_unchanged_cycles() {
    let c = coordinator(Arc::new(FixtureSource::default()), RefreshPolicy::default());
    let first: Vec<String> =
        c.refresh_at(t0()).await.snapshot.unwrap().entity_ids().into_iter().map(String::from).collect();
    let second: Vec<String> = c
        .refresh_at(t0() + Duration::minutes(5))
        .await
        .snapshot
        .unwrap()
        .entity_ids()
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_staleness_flips_after_repeated_failures() {
    let source = Arc::new(FixtureSource::default());
    let c = coordinator(source.clone(), RefreshPolicy::new(5, 10, 12).unwrap());
    assert!(c.refresh_at(t0()).await.success);
    let published = c.current().unwrap();

    source.failing.store(true, Ordering::SeqCst);
    for minutes in [5, 10] {
        let at = t0() + Duration::minutes(minutes);
        let outcome = c.refresh_at(at).await;
        assert!(matches!(outcome.error, Some(RefreshError::Fetch(_))));
        let view = c.view(at);
        let shown = view.snapshot().expect("still available within the staleness threshold");
        assert_eq!(shown.conditions, published.conditions);
        assert_eq!(shown.enrichments, published.enrichments);
    }

    let at = t0() + Duration::minutes(15);
    c.refresh_at(at).await;
    assert!(!c.view(at).is_available());

    // Recovery republishes immediately
    source.failing.store(false, Ordering::SeqCst);
    let at = t0() + Duration::minutes(20);
    assert!(c.refresh_at(at).await.success);
    assert!(c.view(at).is_available());
    assert_eq!(c.current().unwrap().meta.consecutive_failures, 0);
}

#[tokio::test]
async fn test_fetch_timeout_changes_only_metadata() {
    let source = Arc::new(FixtureSource::default());
    let c = coordinator(source.clone(), RefreshPolicy::new(5, 1, 12).unwrap());
    c.refresh_at(t0()).await;
    let before = c.current().unwrap();
    let before_json = serde_json::to_value(&*before).unwrap();

    source.hanging.store(true, Ordering::SeqCst);
    let mut reports = c.cycle_reports();
    let outcome = c.refresh_at(t0() + Duration::minutes(5)).await;
    assert!(matches!(outcome.error, Some(RefreshError::Fetch(FetchError::Timeout(_)))));

    let after = c.current().unwrap();
    let mut after_json = serde_json::to_value(&*after).unwrap();
    assert_ne!(after_json["meta"], before_json["meta"]);
    after_json["meta"] = before_json["meta"].clone();
    assert_eq!(after_json, before_json);

    let report = reports.recv().await.unwrap();
    assert!(!report.success);
    assert_eq!(report.error_kind, Some("fetch_transient"));
    assert!(reports.try_recv().is_err());
}

#[tokio::test]
async fn test_vanished_trail_marked_unavailable() {
    struct Pages(parking_lot::Mutex<Vec<String>>);

    #[async_trait]
    impl PageSource for Pages {
        async fn fetch(&self) -> Result<RawDocument, FetchError> {
            let mut pages = self.0.lock();
            let page = if pages.len() > 1 { pages.remove(0) } else { pages[0].clone() };
            Ok(RawDocument::new(page, Utc::now()))
        }

        fn name(&self) -> &str {
            "pages"
        }
    }

    let trimmed = PAGE.replace("<span class=\"nom\">Cowansville</span>", "<span class=\"nom\">Bromont</span>");
    let c = RefreshCoordinator::new(
        Arc::new(Pages(parking_lot::Mutex::new(vec![PAGE.to_string(), trimmed, PAGE.to_string()]))),
        Arc::new(GeometryProvider::from_index(GeoIndex::build(ways()))),
        TrailMatcher::new(MatchPolicy::default()),
        RefreshPolicy::default(),
        Arc::new(Metrics::new()),
    );

    let cowansville = |c: &RefreshCoordinator| c.entities().into_iter().find(|e| e.entity_id == "47_cowansville");

    c.refresh_at(t0()).await;
    assert!(cowansville(&c).unwrap().available);

    c.refresh_at(t0() + Duration::minutes(5)).await;
    assert!(!cowansville(&c).unwrap().available);
    assert!(c.entities().iter().any(|e| e.entity_id == "47_bromont" && e.available));

    c.refresh_at(t0() + Duration::minutes(10)).await;
    let restored = cowansville(&c).unwrap();
    assert!(restored.available);
    assert_eq!(restored.first_seen, t0());
}
