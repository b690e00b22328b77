//! Per-platform orchestration: resolve, extract, validate, persist.

use crate::config::Config;
use crate::constants::PLATFORM_NUMBER;
use crate::error::{IngestError, Result};
use crate::extract::{extract_cycles, extract_metadata, SkippedCycle};
use crate::models::{IngestRun, RunStatus};
use crate::source::{AttemptRecord, SourceResolver};
use crate::storage::{write_measurements, BatchReport, Store};
use crate::transport::ArchiveTransport;
use crate::validation::{validate, ValidationReport};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Inclusive launch-position bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RegionFilter {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl RegionFilter {
    /// Indian Ocean launch box, 60S to 30N and 20E to 120E.
    pub fn indian_ocean() -> Self {
        Self {
            lat_min: -60.0,
            lat_max: 30.0,
            lon_min: 20.0,
            lon_max: 120.0,
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&latitude)
            && (self.lon_min..=self.lon_max).contains(&longitude)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lat_min > self.lat_max || self.lon_min > self.lon_max {
            return Err(IngestError::Config(format!(
                "region bounds are inverted: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Everything the orchestrator needs, built once and passed in.
pub struct PipelineContext {
    pub resolver: SourceResolver,
    pub store: Arc<dyn Store>,
    pub batch_size: usize,
    pub region: Option<RegionFilter>,
}

impl PipelineContext {
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn ArchiveTransport>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            resolver: SourceResolver::new(
                transport,
                config.archive.mirrors.clone(),
                config.archive.max_attempts,
                &config.archive.archive_centers,
            ),
            store,
            batch_size: config.storage.batch_size,
            region: config.region,
        }
    }
}

/// What happened to one platform. Always produced, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformOutcome {
    pub identifier: String,
    pub status: RunStatus,
    pub attempts: Vec<AttemptRecord>,
    pub mirror: Option<String>,
    pub strategy: Option<String>,
    pub checksums: Vec<String>,
    pub validation: Option<ValidationReport>,
    pub skipped_cycles: Vec<SkippedCycle>,
    pub dropped_levels: usize,
    pub cycles_written: usize,
    pub batches: Option<BatchReport>,
    pub error: Option<String>,
}

impl PlatformOutcome {
    fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: RunStatus::Failed,
            attempts: Vec::new(),
            mirror: None,
            strategy: None,
            checksums: Vec::new(),
            validation: None,
            skipped_cycles: Vec::new(),
            dropped_levels: 0,
            cycles_written: 0,
            batches: None,
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Succeeded | RunStatus::Skipped | RunStatus::OutOfRegion
        )
    }

    pub fn measurements_written(&self) -> usize {
        self.batches.as_ref().map(|b| b.rows_written).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<PlatformOutcome>,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

pub struct Pipeline {
    context: PipelineContext,
}

impl Pipeline {
    pub fn new(context: PipelineContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Process one platform end to end. Failures are reported in the
    /// returned outcome.
    #[instrument(skip(self))]
    pub async fn process_platform(&self, identifier: &str, force: bool) -> PlatformOutcome {
        let identifier = identifier.trim();
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut outcome = PlatformOutcome::new(identifier);

        if let Err(e) = self.run(identifier, force, &mut outcome).await {
            error!("Platform {} failed: {}", identifier, e);
            outcome.status = RunStatus::Failed;
            outcome.error = Some(e.to_string());
        }

        counter!("argo_platforms_processed_total", "outcome" => outcome.status.as_str())
            .increment(1);
        histogram!("argo_platform_duration_seconds").record(timer.elapsed().as_secs_f64());

        if outcome.status != RunStatus::Skipped {
            self.log_run(&outcome, started_at).await;
        }
        outcome
    }

    async fn run(&self, identifier: &str, force: bool, outcome: &mut PlatformOutcome) -> Result<()> {
        let ctx = &self.context;
        if identifier.is_empty() {
            return Err(IngestError::MissingRequiredField {
                identifier: identifier.to_string(),
                field: PLATFORM_NUMBER.to_string(),
            });
        }

        if !force && ctx.store.platform_exists(identifier).await? {
            info!("Platform {} already stored, skipping", identifier);
            outcome.status = RunStatus::Skipped;
            return Ok(());
        }

        let resolution = ctx.resolver.resolve(identifier).await;
        outcome.attempts = resolution.attempts;
        let source = resolution.source?;
        outcome.mirror = Some(source.mirror.name.clone());
        outcome.strategy = Some(source.strategy_name().to_string());

        let metadata = match extract_metadata(&source, identifier).await {
            Ok(metadata) => metadata,
            Err(e @ IngestError::MissingRequiredField { .. }) => {
                outcome.validation = Some(ValidationReport::rejected(&e));
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        outcome.checksums.push(metadata.checksum);
        let platform = metadata.records;

        if let (Some(region), Some(lat), Some(lon)) = (
            ctx.region,
            platform.launch_latitude,
            platform.launch_longitude,
        ) {
            if !region.contains(lat, lon) {
                info!("Platform {} launched outside the configured region", identifier);
                outcome.status = RunStatus::OutOfRegion;
                return Ok(());
            }
        }

        let profile = extract_cycles(&source, identifier).await?;
        outcome.checksums.push(profile.checksum);
        let records = profile.records;
        outcome.skipped_cycles = records.skipped;
        outcome.dropped_levels = records.dropped_levels;

        let report = validate(&platform, &records.cycles, &records.measurements);
        let valid = report.valid;
        let errors = report.errors.clone();
        outcome.validation = Some(report);
        if !valid {
            return Err(IngestError::ValidationFailed { errors });
        }

        ctx.store.upsert_platform(&platform).await?;
        outcome.cycles_written = ctx.store.upsert_cycles(&records.cycles).await?;
        let batches =
            write_measurements(ctx.store.as_ref(), &records.measurements, ctx.batch_size).await;
        outcome.status = if batches.success() {
            RunStatus::Succeeded
        } else {
            RunStatus::PartiallyPersisted
        };
        info!(
            "Platform {} stored: {} cycles, {} measurements, {} failed batches",
            identifier,
            outcome.cycles_written,
            batches.rows_written,
            batches.failures.len()
        );
        outcome.batches = Some(batches);
        Ok(())
    }

    /// Append the run log row; failures here never change the outcome.
    async fn log_run(&self, outcome: &PlatformOutcome, started_at: DateTime<Utc>) {
        let run = IngestRun {
            run_id: Uuid::new_v4(),
            platform_number: outcome.identifier.clone(),
            mirror: outcome.mirror.clone(),
            strategy: outcome.strategy.clone(),
            checksums: outcome.checksums.clone(),
            status: outcome.status,
            cycles_written: outcome.cycles_written,
            measurements_written: outcome.measurements_written(),
            failed_batches: outcome.batches.as_ref().map(|b| b.failures.len()).unwrap_or(0),
            message: outcome.error.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.context.store.record_run(&run).await {
            warn!("Could not record ingest run for {}: {}", outcome.identifier, e);
        }
    }

    /// Process platforms one after another.
    pub async fn process_batch(&self, identifiers: &[String], force: bool) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for identifier in identifiers {
            let outcome = self.process_platform(identifier, force).await;
            match outcome.status {
                RunStatus::Skipped => summary.skipped += 1,
                _ if outcome.success() => summary.succeeded += 1,
                _ => summary.failed += 1,
            }
            summary.outcomes.push(outcome);
        }
        info!(
            "Batch complete: {} succeeded, {} skipped, {} failed",
            summary.succeeded, summary.skipped, summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_bounds_are_inclusive() {
        let region = RegionFilter::indian_ocean();
        assert!(region.contains(-60.0, 20.0));
        assert!(region.contains(0.0, 75.0));
        assert!(!region.contains(0.0, 150.0));
        assert!(!region.contains(40.0, 75.0));
        assert!(region.validate().is_ok());
    }
}
