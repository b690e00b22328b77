//! Relational persistence of platforms, cycles and measurements.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{Cycle, IngestRun, Measurement, Platform, PlatformSummary};
use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

/// Upsert-based store. Each call is its own unit of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn init_schema(&self) -> Result<()>;

    async fn platform_exists(&self, platform_number: &str) -> Result<bool>;

    /// Insert, or update only the mutable columns of an existing platform.
    async fn upsert_platform(&self, platform: &Platform) -> Result<()>;

    /// Insert or overwrite one cycle. The platform must already be stored.
    async fn upsert_cycle(&self, cycle: &Cycle) -> Result<()>;

    /// Upsert a platform's cycles as one unit of work.
    async fn upsert_cycles(&self, cycles: &[Cycle]) -> Result<usize> {
        for cycle in cycles {
            self.upsert_cycle(cycle).await?;
        }
        Ok(cycles.len())
    }

    /// Upsert one batch of measurements atomically. Returns rows written.
    async fn upsert_measurements_batch(&self, batch: &[Measurement]) -> Result<usize>;

    async fn record_run(&self, run: &IngestRun) -> Result<()>;

    async fn platform_summary(&self, platform_number: &str) -> Result<Option<PlatformSummary>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub rows: usize,
    pub message: String,
}

/// Outcome of writing a platform's measurements in batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub batches: usize,
    pub rows_written: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write `measurements` in chunks of `batch_size`. A failed batch is
/// reported and the remaining batches are still attempted; batches already
/// committed stay committed.
pub async fn write_measurements(
    store: &dyn Store,
    measurements: &[Measurement],
    batch_size: usize,
) -> BatchReport {
    let mut report = BatchReport::default();
    for (batch_index, batch) in measurements.chunks(batch_size.max(1)).enumerate() {
        report.batches += 1;
        match store.upsert_measurements_batch(batch).await {
            Ok(rows) => {
                debug!("Batch {} wrote {} measurement rows", batch_index, rows);
                counter!("argo_measurement_rows_written_total").increment(rows as u64);
                report.rows_written += rows;
            }
            Err(e) => {
                warn!(batch_index, rows = batch.len(), error = %e, "Measurement batch failed");
                counter!("argo_batch_failures_total").increment(1);
                report.failures.push(BatchFailure {
                    batch_index,
                    rows: batch.len(),
                    message: e.to_string(),
                });
            }
        }
    }
    report
}
