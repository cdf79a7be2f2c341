//! Retention behavior of the screenshot store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tempfile::TempDir;

use wisp_core::{
    BlobError, BlobRef, BlobStore, CaptureError, CaptureSource, CapturedFrame, Clock,
    FsBlobStore, ManualClock, StoredBlob,
};
use wisp_screenshots::{RetentionPolicy, ScreenshotConfig, ScreenshotStore};

struct SequentialCapture {
    next: Mutex<u32>,
}

impl SequentialCapture {
    fn new() -> Arc<Self> {
        Arc::new(Self { next: Mutex::new(0) })
    }
}

#[async_trait]
impl CaptureSource for SequentialCapture {
    async fn capture_pixels(&self) -> Result<CapturedFrame, CaptureError> {
        let mut next = self.next.lock();
        *next += 1;
        Ok(CapturedFrame::png(next.to_be_bytes().to_vec()))
    }
}

/// In-memory blob store that remembers when each blob was written.
struct MemoryBlobs {
    clock: Arc<ManualClock>,
    blobs: Mutex<HashMap<String, StoredBlob>>,
    counter: Mutex<u64>,
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put(&self, bytes: &[u8], media_type: &str) -> Result<BlobRef, BlobError> {
        let mut counter = self.counter.lock();
        *counter += 1;
        let blob = BlobRef {
            id: format!("screenshot_{counter}.png"),
            size: bytes.len() as u64,
            media_type: media_type.to_string(),
        };
        self.blobs.lock().insert(
            blob.id.clone(),
            StoredBlob {
                blob: blob.clone(),
                modified_at: self.clock.now(),
            },
        );
        Ok(blob)
    }

    async fn read(&self, id: &str) -> Result<(BlobRef, Vec<u8>), BlobError> {
        self.blobs
            .lock()
            .get(id)
            .map(|s| (s.blob.clone(), Vec::new()))
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), BlobError> {
        self.blobs
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<StoredBlob>, BlobError> {
        Ok(self.blobs.lock().values().cloned().collect())
    }
}

#[tokio::test]
async fn test_five_captures_keep_three_most_recent() {
    let dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> =
        Arc::new(FsBlobStore::open(dir.path(), "screenshot").await.unwrap());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = ScreenshotStore::new(
        Arc::clone(&blobs),
        SequentialCapture::new(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        ScreenshotConfig {
            interval: Duration::from_secs(10),
            retention: RetentionPolicy::new(3, chrono::Duration::hours(24)),
            monitoring: true,
        },
    );

    // One timer tick: capture then sweep.
    let mut captured = Vec::new();
    for _ in 0..5 {
        captured.push(store.capture_now().await.unwrap());
        store.sweep().await;
        clock.advance(chrono::Duration::seconds(10));
    }

    let latest = store.latest(3).await;
    let expected: Vec<_> = captured.iter().rev().take(3).cloned().collect();
    assert_eq!(latest, expected);
    assert_eq!(store.latest(10).await.len(), 3);

    let mut on_disk: Vec<String> = blobs
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.blob.id)
        .collect();
    on_disk.sort();
    let mut kept: Vec<String> = expected.into_iter().map(|r| r.blob.id).collect();
    kept.sort();
    assert_eq!(on_disk, kept);
}

#[tokio::test]
async fn test_age_bound_evicts_everything_stale() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let blobs = Arc::new(MemoryBlobs {
        clock: Arc::clone(&clock),
        blobs: Mutex::new(HashMap::new()),
        counter: Mutex::new(0),
    });
    let store = ScreenshotStore::new(
        Arc::clone(&blobs) as Arc<dyn BlobStore>,
        SequentialCapture::new(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        ScreenshotConfig {
            interval: Duration::from_secs(60),
            retention: RetentionPolicy::new(20, chrono::Duration::seconds(120)),
            monitoring: true,
        },
    );

    for _ in 0..4 {
        store.capture_now().await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
    }
    // Ages are now 240, 180, 120 and 60 seconds.
    let report = store.sweep().await;
    assert_eq!(report.evicted, 2);
    assert_eq!(store.stats().await.count, 2);
    assert_eq!(blobs.blobs.lock().len(), 2);
}

#[derive(Debug, Clone)]
enum Op {
    Capture,
    Sweep,
    Advance(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Capture),
        2 => Just(Op::Sweep),
        2 => (1i64..200).prop_map(Op::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any interleaving of captures and sweeps, a sweep leaves the
    /// collection within both bounds and every remaining record still has
    /// its blob.
    #[test]
    fn sweep_restores_bounds(
        ops in prop::collection::vec(op_strategy(), 1..60),
        max_count in 1usize..6,
        max_age_secs in 30i64..600,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let blobs = Arc::new(MemoryBlobs {
                clock: Arc::clone(&clock),
                blobs: Mutex::new(HashMap::new()),
                counter: Mutex::new(0),
            });
            let policy = RetentionPolicy::new(max_count, chrono::Duration::seconds(max_age_secs));
            let store = ScreenshotStore::new(
                Arc::clone(&blobs) as Arc<dyn BlobStore>,
                SequentialCapture::new(),
                Arc::clone(&clock) as Arc<dyn Clock>,
                ScreenshotConfig {
                    interval: Duration::from_secs(10),
                    retention: policy,
                    monitoring: true,
                },
            );

            for op in ops {
                match op {
                    Op::Capture => {
                        store.capture_now().await.unwrap();
                    }
                    Op::Sweep => {
                        store.sweep().await;
                        let records = store.latest(usize::MAX).await;
                        prop_assert!(policy.is_satisfied(&records, clock.now()));
                    }
                    Op::Advance(secs) => clock.advance(chrono::Duration::seconds(secs)),
                }
            }

            store.sweep().await;
            let records = store.latest(usize::MAX).await;
            prop_assert!(records.len() <= max_count);
            prop_assert!(policy.is_satisfied(&records, clock.now()));

            // Most recent first.
            for pair in records.windows(2) {
                prop_assert!(pair[0].captured_at >= pair[1].captured_at);
            }

            // No dangling records and no leaked blobs.
            let stored = blobs.blobs.lock();
            prop_assert_eq!(stored.len(), records.len());
            for record in &records {
                prop_assert!(stored.contains_key(&record.blob.id));
            }
            Ok(())
        })?;
    }
}
