use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use meshcp_core::{Instance, LeaderElector, Result};

use super::{Catalog, Heartbeats};
use crate::cluster::detached;

/// Catalog writer configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Interval between catalog publications.
    pub interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Counters describing what the writer has done.
#[derive(Debug, Default)]
pub struct WriterStats {
    ticks: AtomicU64,
    replace_attempts: AtomicU64,
    changed: AtomicU64,
    failures: AtomicU64,
    last_replace_micros: AtomicU64,
    last_published_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of `WriterStats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStatsSnapshot {
    pub ticks: u64,
    pub replace_attempts: u64,
    pub changed: u64,
    pub failures: u64,
    pub last_replace_duration: Duration,
    pub last_published_at: Option<DateTime<Utc>>,
}

impl WriterStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_replace(&self, result: &Result<bool>, elapsed: Duration) {
        self.replace_attempts.fetch_add(1, Ordering::SeqCst);
        self.last_replace_micros
            .store(elapsed.as_micros() as u64, Ordering::SeqCst);
        match result {
            Ok(changed) => {
                if *changed {
                    self.changed.fetch_add(1, Ordering::SeqCst);
                }
                if let Ok(mut at) = self.last_published_at.lock() {
                    *at = Some(Utc::now());
                }
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            ticks: self.ticks.load(Ordering::SeqCst),
            replace_attempts: self.replace_attempts.load(Ordering::SeqCst),
            changed: self.changed.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            last_replace_duration: Duration::from_micros(
                self.last_replace_micros.load(Ordering::SeqCst),
            ),
            last_published_at: self.last_published_at.lock().ok().and_then(|at| *at),
        }
    }
}

/// Leader-only loop that republishes the catalog from collected heartbeats.
pub struct CatalogWriter {
    catalog: Arc<dyn Catalog>,
    heartbeats: Arc<Heartbeats>,
    leadership: Arc<dyn LeaderElector>,
    instance: Instance,
    config: WriterConfig,
    stats: Arc<WriterStats>,
}

impl CatalogWriter {
    /// Create a new catalog writer for `instance`.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        heartbeats: Arc<Heartbeats>,
        leadership: Arc<dyn LeaderElector>,
        instance: Instance,
        config: WriterConfig,
    ) -> Self {
        Self {
            catalog,
            heartbeats,
            leadership,
            instance: instance.as_leader(),
            config,
            stats: Arc::new(WriterStats::new()),
        }
    }

    /// Shared handle to the writer's counters.
    pub fn stats(&self) -> Arc<WriterStats> {
        self.stats.clone()
    }

    /// Publish collected heartbeats plus this leader. Returns whether the catalog changed.
    pub async fn publish(&self) -> Result<bool> {
        let mut instances = self.heartbeats.reset_and_collect();
        instances.retain(|i| i.id != self.instance.id);
        instances.push(self.instance.clone());

        let started = Instant::now();
        let result = self.catalog.replace(instances).await;
        self.stats.record_replace(&result, started.elapsed());
        result
    }

    /// Publish while this instance leads, until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        let span = tracing::info_span!("catalog_writer", instance_id = %self.instance.id);
        async {
            let mut leadership = self.leadership.subscribe();
            loop {
                while !*leadership.borrow_and_update() {
                    tokio::select! {
                        changed = leadership.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = shutdown.cancelled() => return,
                    }
                }

                self.lead(&mut leadership, &shutdown).await;
                if shutdown.is_cancelled() {
                    tracing::info!("Catalog writer shutting down");
                    return;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn lead(&self, leadership: &mut watch::Receiver<bool>, shutdown: &CancellationToken) {
        tracing::info!("Leadership acquired, publishing catalog");
        if let Err(e) = self.catalog.replace_leader(self.instance.clone()).await {
            tracing::warn!(error = %e, "Failed to publish leader entry, retrying next tick");
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tick = self.stats.record_tick();
                    match self.publish().await {
                        Ok(changed) => tracing::debug!(tick, changed, "Published catalog"),
                        Err(e) => tracing::warn!(tick, error = %e, "Failed to publish catalog"),
                    }
                }
                changed = leadership.changed() => {
                    if changed.is_err() || !*leadership.borrow_and_update() {
                        tracing::info!("Leadership lost");
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        self.step_down().await;
    }

    /// Remove our leader entry so followers stop pinging us.
    async fn step_down(&self) {
        let catalog = self.catalog.clone();
        let instance = self.instance.clone();
        match detached(async move { catalog.drop_leader(instance).await }).await {
            Ok(true) => tracing::info!("Removed leader entry from catalog"),
            Ok(false) => tracing::debug!("Leader entry already absent"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove leader entry"),
        }
    }
}
