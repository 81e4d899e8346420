//! Process-wide sidecar state and lifecycle.
//!
//! `register` builds every component synchronously so hooks are safe from the
//! first event, then finishes the slow parts (health probe, notebook cache,
//! initial sync, periodic timer) in a background task that hooks await
//! through a shared ready flag. Background failure never reaches a handler.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use mnemo_core::Config;
use mnemo_db::{IndexDb, IndexStats, IndexStore};
use mnemo_recall::{
    IntentAnalyzer, LinkedDocResolver, RetrievalEngine, SiyuanClient, SyncService,
};

/// Errors surfaced by `register`. Everything after registration degrades
/// instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("configuration error: {0}")]
    Config(#[from] mnemo_core::ConfigError),

    #[error("local index error: {0}")]
    Db(#[from] mnemo_db::DbError),
}

/// The composed sidecar. Cheap to clone; one per process.
#[derive(Clone)]
pub struct Sidecar {
    pub(crate) inner: Arc<SidecarInner>,
}

pub(crate) struct SidecarInner {
    pub(crate) config: Config,
    pub(crate) client: Arc<SiyuanClient>,
    pub(crate) store: Option<Arc<IndexStore>>,
    pub(crate) sync: Option<Arc<SyncService>>,
    pub(crate) analyzer: IntentAnalyzer,
    pub(crate) engine: RetrievalEngine,
    pub(crate) linked: LinkedDocResolver,
    pub(crate) available: AtomicBool,
    ready_rx: watch::Receiver<bool>,
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Sidecar {
    /// Build the sidecar from merged configuration and start background
    /// initialization.
    pub async fn register(config: Config) -> Result<Self, SidecarError> {
        let client = Arc::new(SiyuanClient::new(&config.settings.siyuan));

        let store = if config.settings.index.enabled {
            let db = IndexDb::open(Path::new(&config.settings.index.db_path)).await?;
            Some(Arc::new(IndexStore::new(
                db,
                config.settings.index.excluded_notebook_names(),
            )))
        } else {
            None
        };

        let sync = store.as_ref().map(|store| {
            Arc::new(SyncService::new(
                Arc::clone(&client),
                Arc::clone(store),
                config.settings.index.clone(),
            ))
        });

        let analyzer = IntentAnalyzer::new(config.settings.recall.clone());
        let engine = RetrievalEngine::new(
            Arc::clone(&client),
            store.clone(),
            config.settings.recall.clone(),
        );
        let linked = LinkedDocResolver::new(Arc::clone(&client), config.linked_doc());

        let (ready_tx, ready_rx) = watch::channel(false);
        let inner = Arc::new(SidecarInner {
            config,
            client,
            store,
            sync,
            analyzer,
            engine,
            linked,
            available: AtomicBool::new(false),
            ready_rx,
            timer: std::sync::Mutex::new(None),
        });

        let sidecar = Self {
            inner: Arc::clone(&inner),
        };
        tokio::spawn(background_init(inner, ready_tx));
        Ok(sidecar)
    }

    /// Convenience: load config from an optional file plus gateway overlay,
    /// then register.
    pub async fn register_with(
        file: Option<&Path>,
        gateway_overlay: Option<&serde_json::Value>,
    ) -> Result<Self, SidecarError> {
        let config = Config::load(file, gateway_overlay)?;
        Self::register(config).await
    }

    /// Await background initialization. Never propagates its failure.
    pub async fn ensure_initialized(&self) {
        let mut rx = self.inner.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Cached remote availability.
    pub fn remote_available(&self) -> bool {
        self.inner.available.load(Ordering::Relaxed)
    }

    /// One reconnect attempt when the cached availability is false.
    pub(crate) async fn ensure_remote(&self) -> bool {
        if self.remote_available() {
            return true;
        }
        let health = self.inner.client.health_check().await;
        self.inner
            .available
            .store(health.available, Ordering::Relaxed);
        if health.available {
            info!(version = health.version.as_deref().unwrap_or("unknown"), "note store reconnected");
        } else {
            debug!(
                "note store still unavailable: {}",
                health.error.as_deref().unwrap_or("unknown")
            );
        }
        health.available
    }

    /// Index statistics for diagnostics.
    pub async fn stats(&self) -> Option<IndexStats> {
        let store = self.inner.store.as_ref()?;
        match store.stats().await {
            Ok(stats) => Some(stats),
            Err(err) => {
                warn!("stats query failed: {err}");
                None
            }
        }
    }

    /// Stop the periodic timer and close the index pool.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.timer.lock().expect("timer lock").take() {
            handle.abort();
        }
        if let Some(store) = &self.inner.store {
            store.db().close().await;
        }
        info!("sidecar shut down");
    }
}

async fn background_init(inner: Arc<SidecarInner>, ready_tx: watch::Sender<bool>) {
    let health = inner.client.health_check().await;
    inner.available.store(health.available, Ordering::Relaxed);
    if health.available {
        info!(
            version = health.version.as_deref().unwrap_or("unknown"),
            "note store reachable"
        );
    } else {
        warn!(
            "note store unavailable at startup: {}",
            health.error.as_deref().unwrap_or("unknown")
        );
    }

    if let Some(sync) = &inner.sync {
        if health.available {
            match sync.sync_once().await {
                Ok(report) => info!(
                    synced = report.synced,
                    deleted = report.deleted,
                    "startup sync finished"
                ),
                Err(err) => warn!("startup sync failed: {err}"),
            }
        }

        let handle = start_sync_timer(
            Arc::clone(sync),
            Duration::from_millis(inner.config.settings.index.sync_interval_ms),
        );
        *inner.timer.lock().expect("timer lock") = Some(handle);
    }

    let _ = ready_tx.send(true);
}

/// Periodic incremental sync. A tick that fires while the previous one is
/// still running is skipped.
fn start_sync_timer(sync: Arc<SyncService>, period: Duration) -> JoinHandle<()> {
    let running = Arc::new(AtomicBool::new(false));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let handle = tokio::spawn(async move {
        loop {
            interval.tick().await;
            if running.swap(true, Ordering::SeqCst) {
                debug!("previous sync still running, skipping tick");
                continue;
            }
            let sync = Arc::clone(&sync);
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                if let Err(err) = sync.sync_once().await {
                    warn!("periodic sync failed: {err}");
                }
                running.store(false, Ordering::SeqCst);
            });
        }
    });

    info!(period_ms = period.as_millis() as u64, "periodic sync timer started");
    handle
}
