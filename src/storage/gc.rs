//! Garbage collection for orphaned extents.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use super::{ExtentStore, MetadataStore};
use crate::error::StorageResult;

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub scanned: usize,
    pub deleted: usize,
    pub reclaimed_bytes: u64,
}

/// Garbage collector for cleaning up orphaned extents.
///
/// An extent is swept when nothing in the metadata store references it, it
/// is not the extent currently receiving appends, and its last append is
/// older than the grace period. The grace period covers content written ahead
/// of the metadata record that will reference it.
pub struct GarbageCollector {
    metadata: Arc<dyn MetadataStore>,
    extents: Arc<dyn ExtentStore>,
    interval: Duration,
    grace: Duration,
}

impl GarbageCollector {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        extents: Arc<dyn ExtentStore>,
        interval: Duration,
    ) -> Self {
        Self {
            metadata,
            extents,
            interval,
            grace: interval,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Starts the garbage collection loop.
    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            match self.collect().await {
                Ok(report) if report.deleted > 0 => info!(
                    "Garbage collection removed {} of {} extents ({} bytes)",
                    report.deleted, report.scanned, report.reclaimed_bytes
                ),
                Ok(_) => {}
                Err(e) => warn!("Garbage collection failed: {}", e),
            }
        }
    }

    /// Performs a single mark and sweep pass.
    pub async fn collect(&self) -> StorageResult<GcReport> {
        debug!("Starting garbage collection");
        let extents = self.extents.list_extents().await?;
        // Mark after listing so an extent referenced in between is kept.
        let referenced = self.metadata.referenced_extents().await?;

        let grace = chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - grace;

        let mut report = GcReport {
            scanned: extents.len(),
            ..Default::default()
        };
        for extent in extents {
            if extent.active || extent.last_append_at > cutoff || referenced.contains(&extent.id) {
                continue;
            }
            self.extents.delete(&extent.id).await?;
            report.deleted += 1;
            report.reclaimed_bytes += extent.size;
        }

        debug!(
            "Garbage collection finished: {} scanned, {} deleted",
            report.scanned, report.deleted
        );
        Ok(report)
    }
}
