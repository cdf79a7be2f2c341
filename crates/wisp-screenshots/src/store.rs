//! Screenshot store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wisp_core::{BlobError, BlobStore, CaptureSource, Clock};

use crate::{RetentionPolicy, ScreenshotError, ScreenshotRecord};

/// Store tuning.
#[derive(Debug, Clone)]
pub struct ScreenshotConfig {
    /// Capture cadence.
    pub interval: Duration,
    pub retention: RetentionPolicy,
    /// Whether the capture timer starts enabled.
    pub monitoring: bool,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retention: RetentionPolicy::new(20, chrono::Duration::hours(24)),
            monitoring: true,
        }
    }
}

/// Storage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotStats {
    pub count: usize,
    pub total_bytes: u64,
    pub max_count: usize,
    pub max_age_seconds: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub monitoring: bool,
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    /// Evictions whose blob could not be deleted. Those records are kept and
    /// retried on the next sweep.
    pub failed: usize,
}

/// A bounded, continuously refreshed cache of desktop screenshots.
///
/// Records are kept oldest first behind a single lock shared by capture
/// append and sweep eviction. The lock is never held while pixels are being
/// acquired or blobs deleted. Sweeps and clears run one at a time.
pub struct ScreenshotStore {
    blobs: Arc<dyn BlobStore>,
    capture: Arc<dyn CaptureSource>,
    clock: Arc<dyn Clock>,
    config: ScreenshotConfig,
    records: Mutex<Vec<ScreenshotRecord>>,
    evicting: Mutex<()>,
    monitoring: AtomicBool,
}

impl ScreenshotStore {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        capture: Arc<dyn CaptureSource>,
        clock: Arc<dyn Clock>,
        config: ScreenshotConfig,
    ) -> Self {
        let monitoring = AtomicBool::new(config.monitoring);
        Self {
            blobs,
            capture,
            clock,
            config,
            records: Mutex::new(Vec::new()),
            evicting: Mutex::new(()),
            monitoring,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.config.retention
    }

    /// Capture one screenshot and record it.
    #[tracing::instrument(skip(self))]
    pub async fn capture_now(&self) -> Result<ScreenshotRecord, ScreenshotError> {
        let frame = self.capture.capture_pixels().await?;
        let blob = self.blobs.put(&frame.bytes, &frame.media_type).await?;
        let record = ScreenshotRecord {
            id: Uuid::new_v4(),
            captured_at: self.clock.now(),
            size: blob.size,
            blob,
        };

        let mut records = self.records.lock().await;
        let at = records.partition_point(|r| r.captured_at <= record.captured_at);
        records.insert(at, record.clone());
        debug!(id = %record.id, size = record.size, count = records.len(), "captured screenshot");
        Ok(record)
    }

    /// Evict records violating the retention policy, oldest first.
    ///
    /// Each eviction deletes the blob before dropping the record, so a crash
    /// in between leaves an orphaned blob rather than a dangling record.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let _evicting = self.evicting.lock().await;
        let now = self.clock.now();
        let victims: Vec<ScreenshotRecord> = {
            let records = self.records.lock().await;
            self.config
                .retention
                .plan(&records, now)
                .into_iter()
                .filter_map(|id| records.iter().find(|r| r.id == id).cloned())
                .collect()
        };

        let mut report = SweepReport::default();
        for victim in victims {
            match self.blobs.delete(&victim.blob.id).await {
                Ok(()) | Err(BlobError::NotFound(_)) => {
                    if self.forget(victim.id).await {
                        report.evicted += 1;
                    }
                }
                Err(e) => {
                    warn!(blob = %victim.blob.id, error = %e, "failed to evict screenshot");
                    report.failed += 1;
                }
            }
        }

        if report.evicted > 0 || report.failed > 0 {
            let remaining = self.records.lock().await.len();
            debug!(
                evicted = report.evicted,
                failed = report.failed,
                remaining,
                "retention sweep"
            );
        }
        report
    }

    /// Drop a record by id. Returns whether it was still present.
    async fn forget(&self, id: Uuid) -> bool {
        let mut records = self.records.lock().await;
        match records.iter().position(|r| r.id == id) {
            Some(pos) => {
                records.remove(pos);
                true
            }
            None => false,
        }
    }

    /// The `n` most recent records, most recent first.
    pub async fn latest(&self, n: usize) -> Vec<ScreenshotRecord> {
        self.records
            .lock()
            .await
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect()
    }

    /// Delete every record present when called. Returns how many were
    /// removed.
    pub async fn clear(&self) -> usize {
        let _evicting = self.evicting.lock().await;
        let present = self.records.lock().await.clone();

        let mut removed = 0;
        for record in present {
            match self.blobs.delete(&record.blob.id).await {
                Ok(()) | Err(BlobError::NotFound(_)) => {
                    if self.forget(record.id).await {
                        removed += 1;
                    }
                }
                Err(e) => warn!(blob = %record.blob.id, error = %e, "failed to delete screenshot"),
            }
        }

        info!(removed, "cleared screenshots");
        removed
    }

    pub async fn stats(&self) -> ScreenshotStats {
        let records = self.records.lock().await;
        ScreenshotStats {
            count: records.len(),
            total_bytes: records.iter().map(|r| r.size).sum(),
            max_count: self.config.retention.max_count,
            max_age_seconds: self.config.retention.max_age.num_seconds(),
            oldest: records.first().map(|r| r.captured_at),
            newest: records.last().map(|r| r.captured_at),
            monitoring: self.is_monitoring(),
        }
    }

    /// Rebuild records from blobs already in the store.
    ///
    /// Blobs already tracked are skipped. Returns how many records were
    /// added.
    #[tracing::instrument(skip(self))]
    pub async fn rehydrate(&self) -> Result<usize, ScreenshotError> {
        let mut stored = self.blobs.list().await?;
        stored.sort_by_key(|s| s.modified_at);

        let mut records = self.records.lock().await;
        let mut added = 0;
        for entry in stored {
            if records.iter().any(|r| r.blob.id == entry.blob.id) {
                continue;
            }
            let record = ScreenshotRecord {
                id: Uuid::new_v4(),
                captured_at: entry.modified_at,
                size: entry.blob.size,
                blob: entry.blob,
            };
            let at = records.partition_point(|r| r.captured_at <= record.captured_at);
            records.insert(at, record);
            added += 1;
        }

        info!(added, total = records.len(), "rehydrated screenshots");
        Ok(added)
    }

    /// Pause or resume the capture cadence. Sweeps continue either way.
    pub fn set_monitoring(&self, enabled: bool) {
        let was = self.monitoring.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "screenshot monitoring toggled");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Run the capture and sweep timer until shutdown.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_count = self.config.retention.max_count,
            "screenshot timer starting"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("screenshot timer received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.is_monitoring() {
                        if let Err(e) = self.capture_now().await {
                            warn!(error = %e, "screenshot capture failed");
                        }
                    }
                    self.sweep().await;
                }
            }
        }

        info!("screenshot timer shut down");
    }
}
