//! Owned, lazily loaded access to the geometry index
//!
//! Refresh cycles read the index through `current_or_spawn_load()`, which
//! never waits on the map source: until a load succeeds they get an empty
//! index and a background load is started. `reload()` builds a complete new
//! index before swapping it in, so readers see either the old index or the
//! new one, never a partial build.

use crate::domain::geometry::WayRecord;
use crate::infra::metrics::Metrics;
use crate::services::geo_index::GeoIndex;
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the map dataset comes from
#[async_trait]
pub trait GeometrySource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<WayRecord>>;

    /// Short label for logs
    fn name(&self) -> &str;
}

/// Fixed in-memory dataset
pub struct StaticWays(pub Vec<WayRecord>);

#[async_trait]
impl GeometrySource for StaticWays {
    async fn load(&self) -> anyhow::Result<Vec<WayRecord>> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

pub struct GeometryProvider {
    source: Option<Arc<dyn GeometrySource>>,
    current: RwLock<Option<Arc<GeoIndex>>>,
    /// Serializes loads so concurrent callers query the source once
    loading: tokio::sync::Mutex<()>,
    /// Set while a spawned background load is running
    background: AtomicBool,
    metrics: Arc<Metrics>,
}

impl GeometryProvider {
    pub fn new(source: Arc<dyn GeometrySource>, metrics: Arc<Metrics>) -> Self {
        Self {
            source: Some(source),
            current: RwLock::new(None),
            loading: tokio::sync::Mutex::new(()),
            background: AtomicBool::new(false),
            metrics,
        }
    }

    /// Provider pinned to a prebuilt index; `reload()` is unavailable
    pub fn from_index(index: GeoIndex) -> Self {
        Self {
            source: None,
            current: RwLock::new(Some(Arc::new(index))),
            loading: tokio::sync::Mutex::new(()),
            background: AtomicBool::new(false),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Index currently exposed, without triggering a load
    pub fn current(&self) -> Option<Arc<GeoIndex>> {
        self.current.read().clone()
    }

    /// Current index without waiting. When none is loaded yet the caller gets
    /// an empty index (every trail unmatched) and a background load starts.
    /// A failed load is not cached, so the next call starts another one.
    pub fn current_or_spawn_load(self: &Arc<Self>) -> Arc<GeoIndex> {
        if let Some(index) = self.current() {
            return index;
        }
        self.spawn_load();
        Arc::new(GeoIndex::default())
    }

    /// Start a background load unless one is already running or there is no
    /// source. Must be called from within a tokio runtime.
    pub fn spawn_load(self: &Arc<Self>) {
        if self.source.is_none() {
            return;
        }
        if self
            .background
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("geometry_load_already_running");
            return;
        }
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = provider.reload().await {
                warn!(error = %e, "geometry_unavailable");
            }
            provider.background.store(false, Ordering::Release);
        });
    }

    /// A spawned background load is still running
    pub fn is_loading(&self) -> bool {
        self.background.load(Ordering::Acquire)
    }

    /// Rebuild from the source and swap. Returns the number of indexed ways.
    pub async fn reload(&self) -> anyhow::Result<usize> {
        let _loading = self.loading.lock().await;
        let index = self.load().await?;
        Ok(index.len())
    }

    async fn load(&self) -> anyhow::Result<Arc<GeoIndex>> {
        let source = self.source.as_ref().ok_or_else(|| anyhow!("no geometry source configured"))?;
        let ways = match source.load().await {
            Ok(ways) => ways,
            Err(e) => {
                self.metrics.record_geometry_load(None);
                return Err(e);
            }
        };
        let index = Arc::new(GeoIndex::build(ways));
        self.metrics.record_geometry_load(Some(index.len()));
        info!(source = %source.name(), ways = index.len(), "geometry_index_loaded");
        *self.current.write() = Some(Arc::clone(&index));
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::WayId;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingSource {
        fn new(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail, delay })
        }
    }

    #[async_trait]
    impl GeometrySource for CountingSource {
        async fn load(&self) -> anyhow::Result<Vec<WayRecord>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(anyhow!("overpass down"));
            }
            Ok(vec![WayRecord {
                id: WayId(n + 1),
                name: format!("Piste {}", n + 1),
                reference: None,
                nodes: vec![],
            }])
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    async fn settle(provider: &GeometryProvider) {
        while provider.is_loading() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_first_read_is_empty_and_loads_in_background() {
        let source = CountingSource::new(false, Duration::ZERO);
        let provider = Arc::new(GeometryProvider::new(source.clone(), Arc::new(Metrics::new())));
        assert!(provider.current().is_none());

        assert!(provider.current_or_spawn_load().is_empty());
        settle(&provider).await;

        let loaded = provider.current().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(Arc::ptr_eq(&loaded, &provider.current_or_spawn_load()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reads_during_slow_load_start_one_load() {
        let source = CountingSource::new(false, Duration::from_millis(50));
        let provider = Arc::new(GeometryProvider::new(source.clone(), Arc::new(Metrics::new())));
        for _ in 0..3 {
            assert!(provider.current_or_spawn_load().is_empty());
        }
        assert!(provider.is_loading());
        settle(&provider).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(provider.current().is_some());
    }

    #[tokio::test]
    async fn test_reload_swaps_whole_index() {
        let source = CountingSource::new(false, Duration::ZERO);
        let provider = GeometryProvider::new(source, Arc::new(Metrics::new()));
        provider.reload().await.unwrap();
        let before = provider.current().unwrap();
        assert_eq!(provider.reload().await.unwrap(), 1);
        let after = provider.current().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        // The old Arc stays valid for readers still holding it
        assert!(before.get(WayId(1)).is_some());
        assert!(after.get(WayId(2)).is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let source = CountingSource::new(true, Duration::ZERO);
        let metrics = Arc::new(Metrics::new());
        let provider = Arc::new(GeometryProvider::new(source.clone(), metrics.clone()));
        for _ in 0..2 {
            assert!(provider.current_or_spawn_load().is_empty());
            settle(&provider).await;
        }
        assert!(provider.current().is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.report().geometry_load_failures, 2);
        assert!(provider.reload().await.is_err());
    }

    #[tokio::test]
    async fn test_from_index_has_no_source() {
        let provider = Arc::new(GeometryProvider::from_index(GeoIndex::build(vec![])));
        assert!(provider.current().is_some());
        provider.spawn_load();
        assert!(!provider.is_loading());
        assert!(provider.reload().await.is_err());
    }
}
