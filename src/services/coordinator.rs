//! Refresh coordinator
//!
//! The only time-driven component. Each cycle walks
//! `Idle → Fetching → Parsing → Matching → Published`, or ends in `Failed`
//! at any stage, then returns to `Idle`. A failed cycle never replaces the
//! published snapshot; it only updates the fetch metadata on it.
//!
//! One cycle runs at a time. A trigger that arrives while a cycle is in
//! flight is coalesced into it and returns `RefreshError::CycleInFlight`.
//! The fetch is the only suspension point and is bounded by the fetch
//! timeout; matching reads whatever geometry index is loaded and never waits
//! for one. Publishing is a single pointer swap after the fetch, so a cycle
//! abandoned while fetching leaves the published state untouched.

use crate::domain::conditions::{ConditionsSnapshot, RawDocument};
use crate::domain::snapshot::{EnrichedSnapshot, FetchMeta, SnapshotView};
use crate::infra::config::RefreshPolicy;
use crate::infra::metrics::{CycleResult, Metrics};
use crate::io::page_source::{log_fetch_permanent, log_fetch_transient, FetchError, FetchErrorKind, PageSource};
use crate::services::geometry_provider::GeometryProvider;
use crate::services::matcher::{EnrichmentBatch, TrailMatcher};
use crate::services::parser::{PageParser, ParseError};
use crate::services::registry::{EntityRecord, EntityRegistry};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REPORT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Fetching,
    Parsing,
    Matching,
    Published,
    Failed,
}

#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("a refresh cycle is already in flight")]
    CycleInFlight,
}

/// Why a cycle that did run ended in `Failed`
#[derive(Debug)]
enum CycleFailure {
    Fetch(FetchError),
    Parse(ParseError),
}

impl From<FetchError> for CycleFailure {
    fn from(e: FetchError) -> Self {
        CycleFailure::Fetch(e)
    }
}

impl From<ParseError> for CycleFailure {
    fn from(e: ParseError) -> Self {
        CycleFailure::Parse(e)
    }
}

impl From<CycleFailure> for RefreshError {
    fn from(failure: CycleFailure) -> Self {
        match failure {
            CycleFailure::Fetch(e) => RefreshError::Fetch(e),
            CycleFailure::Parse(e) => RefreshError::Parse(e),
        }
    }
}

impl RefreshError {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshError::Fetch(e) => match e.kind() {
                FetchErrorKind::Transient => "fetch_transient",
                FetchErrorKind::Permanent => "fetch_permanent",
            },
            RefreshError::Parse(_) => "parse",
            RefreshError::CycleInFlight => "cycle_in_flight",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub cycle_id: Uuid,
    pub success: bool,
    /// Snapshot exposed after the cycle: the new one, or the retained one
    pub snapshot: Option<Arc<EnrichedSnapshot>>,
    pub error: Option<RefreshError>,
}

/// Per-cycle success/failure signal for consumers
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
    pub consecutive_failures: u32,
    pub trails: usize,
    pub trails_matched: usize,
}

/// Holds the in-flight flag for one cycle; released on drop, including when
/// the cycle future is abandoned
struct InFlightGuard<'a> {
    coordinator: &'a RefreshCoordinator,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(coordinator: &'a RefreshCoordinator) -> Option<Self> {
        coordinator
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { coordinator })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.coordinator.state.lock() = CycleState::Idle;
        self.coordinator.in_flight.store(false, Ordering::Release);
    }
}

pub struct RefreshCoordinator {
    source: Arc<dyn PageSource>,
    parser: PageParser,
    matcher: TrailMatcher,
    geometry: Arc<GeometryProvider>,
    policy: RefreshPolicy,
    metrics: Arc<Metrics>,
    in_flight: AtomicBool,
    state: Mutex<CycleState>,
    consecutive_failures: AtomicU32,
    published: RwLock<Option<Arc<EnrichedSnapshot>>>,
    registry: Mutex<EntityRegistry>,
    snapshot_tx: watch::Sender<Option<Arc<EnrichedSnapshot>>>,
    report_tx: broadcast::Sender<CycleReport>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn PageSource>,
        geometry: Arc<GeometryProvider>,
        matcher: TrailMatcher,
        policy: RefreshPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            source,
            parser: PageParser::new(),
            matcher,
            geometry,
            policy,
            metrics,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(CycleState::Idle),
            consecutive_failures: AtomicU32::new(0),
            published: RwLock::new(None),
            registry: Mutex::new(EntityRegistry::new()),
            snapshot_tx,
            report_tx,
        }
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock()
    }

    /// Latest published snapshot, regardless of age
    pub fn current(&self) -> Option<Arc<EnrichedSnapshot>> {
        self.published.read().clone()
    }

    /// Snapshot as consumers should see it at `now`: unavailable once the
    /// last success is strictly older than the staleness threshold
    pub fn view(&self, now: DateTime<Utc>) -> SnapshotView {
        let Some(snapshot) = self.current() else {
            return SnapshotView::Unavailable {
                last_success_at: None,
                reason: "no successful refresh yet".to_string(),
            };
        };
        let age = snapshot.age(now);
        if age.to_std().unwrap_or_default() > self.policy.max_staleness() {
            return SnapshotView::Unavailable {
                last_success_at: Some(snapshot.meta.last_success_at),
                reason: format!(
                    "last success {} min ago exceeds staleness limit of {} min",
                    age.num_minutes(),
                    self.policy.max_staleness().as_secs() / 60
                ),
            };
        }
        SnapshotView::Available { age_secs: age.num_seconds(), snapshot }
    }

    /// Receiver notified on every publish, including metadata-only updates
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<EnrichedSnapshot>>> {
        self.snapshot_tx.subscribe()
    }

    /// Exactly one report per completed cycle; coalesced triggers send none
    pub fn cycle_reports(&self) -> broadcast::Receiver<CycleReport> {
        self.report_tx.subscribe()
    }

    pub fn entities(&self) -> Vec<EntityRecord> {
        self.registry.lock().entities().cloned().collect()
    }

    pub fn geometry(&self) -> &Arc<GeometryProvider> {
        &self.geometry
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_at(Utc::now()).await
    }

    /// Run one cycle, stamping its metadata with `now`
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let cycle_id = Uuid::now_v7();
        let Some(_guard) = InFlightGuard::acquire(self) else {
            self.metrics.record_coalesced();
            debug!(cycle_id = %cycle_id, "refresh_coalesced");
            return RefreshOutcome {
                cycle_id,
                success: false,
                snapshot: self.current(),
                error: Some(RefreshError::CycleInFlight),
            };
        };

        let started = Instant::now();
        let result = self.run_cycle(cycle_id).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((conditions, batch)) => self.publish(cycle_id, now, conditions, batch, duration_ms),
            Err(error) => self.retain(cycle_id, now, error, duration_ms),
        }
    }

    async fn run_cycle(
        &self,
        cycle_id: Uuid,
    ) -> Result<(ConditionsSnapshot, EnrichmentBatch), CycleFailure> {
        self.set_state(CycleState::Fetching);
        let raw = self.fetch().await?;

        self.set_state(CycleState::Parsing);
        let conditions = self.parser.parse(raw)?;
        self.metrics
            .record_parse(conditions.diagnostics.rows_skipped, conditions.diagnostics.warnings.len());
        for warning in &conditions.diagnostics.warnings {
            debug!(cycle_id = %cycle_id, warning = ?warning, "parse_warning");
        }

        self.set_state(CycleState::Matching);
        let index = self.geometry.current_or_spawn_load();
        if index.is_empty() {
            debug!(cycle_id = %cycle_id, "matching_without_geometry");
        }
        let batch = self.matcher.enrich_all(&conditions.trails, &index);
        Ok((conditions, batch))
    }

    async fn fetch(&self) -> Result<RawDocument, FetchError> {
        let timeout = self.policy.fetch_timeout();
        match tokio::time::timeout(timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock() = state;
    }

    fn publish(
        &self,
        cycle_id: Uuid,
        now: DateTime<Utc>,
        conditions: ConditionsSnapshot,
        batch: EnrichmentBatch,
        duration_ms: u64,
    ) -> RefreshOutcome {
        let trails = batch.enrichments.len();
        let trails_matched = batch.matched();
        let snapshot = Arc::new(EnrichedSnapshot {
            conditions: Arc::new(conditions),
            enrichments: Arc::new(batch.enrichments),
            meta: FetchMeta {
                cycle_id,
                attempted_at: now,
                last_success_at: now,
                success: true,
                consecutive_failures: 0,
            },
        });

        *self.published.write() = Some(Arc::clone(&snapshot));
        self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));
        self.set_state(CycleState::Published);
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let diff = self.registry.lock().reconcile(&snapshot);
        if !diff.is_empty() {
            info!(
                cycle_id = %cycle_id,
                added = diff.added.len(),
                vanished = diff.vanished.len(),
                restored = diff.restored.len(),
                "entities_reconciled"
            );
        }

        self.metrics.record_cycle(CycleResult::Published, duration_ms);
        self.metrics
            .set_published(trails, trails_matched, now.timestamp().max(0) as u64);
        info!(
            cycle_id = %cycle_id,
            trails,
            trails_matched,
            status = ?snapshot.conditions.status,
            warnings = snapshot.conditions.diagnostics.warnings.len(),
            duration_ms,
            "cycle_published"
        );

        self.report(CycleReport {
            cycle_id,
            attempted_at: now,
            duration_ms,
            success: true,
            error_kind: None,
            error: None,
            consecutive_failures: 0,
            trails,
            trails_matched,
        });

        RefreshOutcome { cycle_id, success: true, snapshot: Some(snapshot), error: None }
    }

    fn retain(&self, cycle_id: Uuid, now: DateTime<Utc>, failure: CycleFailure, duration_ms: u64) -> RefreshOutcome {
        self.set_state(CycleState::Failed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);

        let retained = {
            let mut published = self.published.write();
            let updated = published.as_ref().map(|prev| Arc::new(prev.with_failed_attempt(cycle_id, now)));
            if let Some(updated) = &updated {
                *published = Some(Arc::clone(updated));
            }
            updated
        };
        if let Some(retained) = &retained {
            self.snapshot_tx.send_replace(Some(Arc::clone(retained)));
        }

        let result = match &failure {
            CycleFailure::Fetch(e) => match e.kind() {
                FetchErrorKind::Transient => {
                    log_fetch_transient(&cycle_id, e);
                    CycleResult::FetchTransient
                }
                FetchErrorKind::Permanent => {
                    log_fetch_permanent(&cycle_id, e);
                    CycleResult::FetchPermanent
                }
            },
            CycleFailure::Parse(e) => {
                log_parse_failed(&cycle_id, e);
                CycleResult::ParseFailed
            }
        };
        let error = RefreshError::from(failure);
        self.metrics.record_cycle(result, duration_ms);
        info!(
            cycle_id = %cycle_id,
            consecutive_failures = failures,
            retained = retained.is_some(),
            duration_ms,
            "cycle_failed"
        );

        let (trails, trails_matched) = retained
            .as_ref()
            .map(|s| (s.enrichments.len(), s.enrichments.values().filter(|e| e.is_matched()).count()))
            .unwrap_or((0, 0));
        self.report(CycleReport {
            cycle_id,
            attempted_at: now,
            duration_ms,
            success: false,
            error_kind: Some(error.label()),
            error: Some(error.to_string()),
            consecutive_failures: failures,
            trails,
            trails_matched,
        });

        RefreshOutcome { cycle_id, success: false, snapshot: retained, error: Some(error) }
    }

    fn report(&self, report: CycleReport) {
        // No receivers is fine: reports are fire-and-forget
        let _ = self.report_tx.send(report);
    }

    /// Refresh on every interval tick until shutdown. The first cycle runs
    /// immediately; ticks missed while a cycle overran are skipped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.policy.interval().as_secs(),
            fetch_timeout_secs = self.policy.fetch_timeout().as_secs(),
            max_staleness_secs = self.policy.max_staleness().as_secs(),
            source = %self.source.name(),
            "coordinator_started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.refresh() => {}
                        _ = shutdown_requested(&mut shutdown) => {
                            info!("refresh_abandoned");
                            break;
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        info!("coordinator_shutdown");
    }
}

/// Resolves once the flag is set, or once the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Log a parse failure (cold path)
#[cold]
fn log_parse_failed(cycle_id: &Uuid, e: &ParseError) {
    let salvaged = e.partial.as_ref().map(|p| p.diagnostics.warnings.len());
    warn!(cycle_id = %cycle_id, error = %e, partial_warnings = ?salvaged, "parse_failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::MatchPolicy;
    use crate::domain::geometry::WayRecord;
    use crate::services::geo_index::GeoIndex;
    use crate::services::geometry_provider::GeometrySource;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::VecDeque;

    const PAGE: &str = r#"<html><body>
        <div class="dash-horaire"><span class="heures">8h30 à 16h00</span></div>
        <div id="dash-acc"><div class="data_metric">12,5 cm</div></div>
        <div id="recap-remontes"><div class="dash-resume">
            <div class="etat"><span class="txt-data">6</span><span class="total">/9</span></div></div></div>
        <div id="recap-pistes"><div class="dash-resume">
            <div class="etat"><span class="txt-data">80</span><span class="total">/145</span></div></div>
            <div class="dash-detail"><div class="bloc_versant"><span class="titre">Versant du Midi</span>
                <div class="liste"><span class="numero">47</span><span class="nom">Cowansville</span>
                    <span class="jour">Ouvert</span></div>
            </div></div></div>
    </body></html>"#;

    /// Replays scripted responses in order, then repeats the last one
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<String, FetchError>>>,
        delay: std::time::Duration,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<String, FetchError>>) -> Arc<Self> {
            Arc::new(Self { responses: Mutex::new(responses.into()), delay: std::time::Duration::ZERO })
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch(&self) -> Result<RawDocument, FetchError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = {
                let mut responses = self.responses.lock();
                if responses.len() > 1 {
                    responses.pop_front()
                } else {
                    responses.front().cloned()
                }
            };
            next.unwrap_or(Err(FetchError::Transport("no script".into())))
                .map(|body| RawDocument::new(body, Utc::now()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn coordinator(source: Arc<dyn PageSource>) -> RefreshCoordinator {
        RefreshCoordinator::new(
            source,
            Arc::new(GeometryProvider::from_index(GeoIndex::build(vec![]))),
            TrailMatcher::new(MatchPolicy::default()),
            RefreshPolicy::new(5, 10, 12).unwrap(),
            Arc::new(Metrics::new()),
        )
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-14T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes() {
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string())]));
        let mut reports = c.cycle_reports();
        let outcome = c.refresh_at(t0()).await;
        assert!(outcome.success);
        assert_eq!(c.state(), CycleState::Idle);
        let snap = c.current().unwrap();
        assert_eq!(snap.meta.last_success_at, t0());
        assert_eq!(snap.conditions.trails.len(), 1);
        assert_eq!(snap.entity_ids(), vec!["47_cowansville"]);
        assert!(reports.try_recv().unwrap().success);
        assert_eq!(c.entities().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_keep_snapshot_until_stale() {
        let timeout = Err(FetchError::Timeout(std::time::Duration::from_secs(10)));
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string()), timeout]));
        let start = t0();
        assert!(c.refresh_at(start).await.success);
        let original = c.current().unwrap();

        for minutes in [5, 10] {
            let at = start + Duration::minutes(minutes);
            assert!(!c.refresh_at(at).await.success);
            let view = c.view(at);
            assert!(view.is_available(), "still available at t+{minutes}");
            let retained = view.snapshot().unwrap();
            assert!(Arc::ptr_eq(&retained.conditions, &original.conditions));
            assert_eq!(retained.enrichments, original.enrichments);
            assert_eq!(retained.meta.last_success_at, start);
        }

        let at = start + Duration::minutes(15);
        assert!(!c.refresh_at(at).await.success);
        assert!(!c.view(at).is_available());
        assert_eq!(c.current().unwrap().meta.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_staleness_boundary_is_strict() {
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string())]));
        c.refresh_at(t0()).await;
        assert!(c.view(t0() + Duration::minutes(12)).is_available());
        assert!(!c.view(t0() + Duration::minutes(12) + Duration::seconds(1)).is_available());
    }

    #[tokio::test]
    async fn test_failure_reported_once_and_only_metadata_changes() {
        let timeout = Err(FetchError::Timeout(std::time::Duration::from_secs(10)));
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string()), timeout]));
        c.refresh_at(t0()).await;
        let before = c.current().unwrap();

        let mut reports = c.cycle_reports();
        let outcome = c.refresh_at(t0() + Duration::minutes(5)).await;
        assert!(matches!(outcome.error, Some(RefreshError::Fetch(FetchError::Timeout(_)))));

        let after = c.current().unwrap();
        assert_eq!(after.conditions, before.conditions);
        assert_eq!(after.enrichments, before.enrichments);
        assert_ne!(after.meta, before.meta);
        assert!(!after.meta.success);
        assert_eq!(after.meta.attempted_at, t0() + Duration::minutes(5));

        let report = reports.try_recv().unwrap();
        assert_eq!(report.error_kind, Some("fetch_transient"));
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_snapshot() {
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string()), Ok("<html></html>".to_string())]));
        c.refresh_at(t0()).await;
        let outcome = c.refresh_at(t0() + Duration::minutes(5)).await;
        assert!(matches!(outcome.error, Some(RefreshError::Parse(_))));
        assert!(outcome.snapshot.is_some());
        assert_eq!(c.current().unwrap().meta.last_success_at, t0());
    }

    #[tokio::test]
    async fn test_failure_without_prior_snapshot_is_unavailable() {
        let c = coordinator(ScriptedSource::new(vec![Err(FetchError::Status { code: 404 })]));
        let outcome = c.refresh_at(t0()).await;
        assert!(outcome.snapshot.is_none());
        assert_eq!(outcome.error.as_ref().map(RefreshError::label), Some("fetch_permanent"));
        assert!(!c.view(t0()).is_available());
    }

    #[tokio::test]
    async fn test_identity_stable_across_cycles() {
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string())]));
        c.refresh_at(t0()).await;
        let first: Vec<String> = c.current().unwrap().entity_ids().into_iter().map(str::to_string).collect();
        c.refresh_at(t0() + Duration::minutes(5)).await;
        let second: Vec<String> = c.current().unwrap().entity_ids().into_iter().map(str::to_string).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_coalesced() {
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(vec![Ok(PAGE.to_string())].into()),
            delay: std::time::Duration::from_millis(200),
        });
        let c = Arc::new(coordinator(source));
        let mut reports = c.cycle_reports();

        let running = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.refresh().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(c.state(), CycleState::Fetching);

        let coalesced = c.refresh().await;
        assert!(matches!(coalesced.error, Some(RefreshError::CycleInFlight)));

        assert!(running.await.unwrap().success);
        assert!(reports.try_recv().unwrap().success);
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_abandoned_cycle_releases_guard() {
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(vec![Ok(PAGE.to_string())].into()),
            delay: std::time::Duration::from_millis(200),
        });
        let c = coordinator(source);
        let abandoned = tokio::time::timeout(std::time::Duration::from_millis(20), c.refresh()).await;
        assert!(abandoned.is_err());
        assert_eq!(c.state(), CycleState::Idle);
        assert!(c.current().is_none());
        assert!(c.refresh().await.success);
    }

    /// Map source that stalls and then fails, like an unreachable Overpass
    struct StalledGeometry;

    #[async_trait]
    impl GeometrySource for StalledGeometry {
        async fn load(&self) -> anyhow::Result<Vec<WayRecord>> {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            anyhow::bail!("overpass unreachable")
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_slow_geometry_does_not_stretch_cycle() {
        let metrics = Arc::new(Metrics::new());
        let geometry = Arc::new(GeometryProvider::new(Arc::new(StalledGeometry), metrics.clone()));
        let c = RefreshCoordinator::new(
            ScriptedSource::new(vec![Ok(PAGE.to_string())]),
            geometry.clone(),
            TrailMatcher::new(MatchPolicy::default()),
            RefreshPolicy::new(5, 1, 12).unwrap(),
            metrics,
        );

        for _ in 0..2 {
            let started = Instant::now();
            let outcome = tokio::time::timeout(std::time::Duration::from_millis(900), c.refresh())
                .await
                .expect("cycle waited on geometry");
            assert!(outcome.success);
            assert!(started.elapsed() < c.policy.fetch_timeout());
            let snap = outcome.snapshot.unwrap();
            assert!(snap.enrichments.values().all(|e| !e.is_matched()));
        }
        assert!(geometry.is_loading());
        assert!(geometry.current().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let c = Arc::new(coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string())])));
        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), Arc::clone(&c).run(rx))
            .await
            .expect("run kept looping on a closed shutdown channel");
    }

    #[tokio::test]
    async fn test_shutdown_false_does_not_abandon_cycle() {
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(vec![Ok(PAGE.to_string())].into()),
            delay: std::time::Duration::from_millis(100),
        });
        let c = Arc::new(coordinator(source));
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(Arc::clone(&c).run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.send(false).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(c.current().is_some());

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), running).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_subscribers_see_publish() {
        let c = coordinator(ScriptedSource::new(vec![Ok(PAGE.to_string())]));
        let mut rx = c.subscribe();
        c.refresh_at(t0()).await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());
    }
}
