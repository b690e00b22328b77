use super::Store;
use crate::error::{IngestError, Result};
use crate::models::{Cycle, IngestRun, Measurement, Platform, PlatformSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type CycleKey = (String, i64);
type LevelKey = (String, i64, i64);

/// In-memory store for development and testing, with the same key and
/// conflict rules as the SQLite store. Measurement batches can be made to
/// fail by call number.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    platforms: Arc<Mutex<HashMap<String, Platform>>>,
    cycles: Arc<Mutex<BTreeMap<CycleKey, Cycle>>>,
    measurements: Arc<Mutex<BTreeMap<LevelKey, Measurement>>>,
    runs: Arc<Mutex<Vec<IngestRun>>>,
    failing_batches: Arc<Mutex<HashSet<usize>>>,
    batch_calls: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    fail_runs: Arc<AtomicBool>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call`-th measurement batch (1-based) fail.
    pub fn fail_measurement_batch(&self, call: usize) {
        guard(&self.failing_batches).insert(call);
    }

    /// Make every run-log write fail.
    pub fn fail_run_log(&self) {
        self.fail_runs.store(true, Ordering::SeqCst);
    }

    /// Number of write calls (platform, cycle, batch) accepted so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn platform(&self, platform_number: &str) -> Option<Platform> {
        guard(&self.platforms).get(platform_number).cloned()
    }

    pub fn cycle_count(&self) -> usize {
        guard(&self.cycles).len()
    }

    pub fn measurement_count(&self) -> usize {
        guard(&self.measurements).len()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        guard(&self.measurements).values().cloned().collect()
    }

    pub fn runs(&self) -> Vec<IngestRun> {
        guard(&self.runs).clone()
    }

    fn require_platform(&self, platform_number: &str) -> Result<()> {
        if guard(&self.platforms).contains_key(platform_number) {
            Ok(())
        } else {
            Err(IngestError::persistence(format!(
                "platform {platform_number} is not stored"
            )))
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn platform_exists(&self, platform_number: &str) -> Result<bool> {
        Ok(guard(&self.platforms).contains_key(platform_number))
    }

    async fn upsert_platform(&self, platform: &Platform) -> Result<()> {
        if platform.launch_latitude.is_none() || platform.launch_longitude.is_none() {
            return Err(IngestError::persistence(format!(
                "platform {} has no launch position",
                platform.platform_number
            )));
        }
        let mut platforms = guard(&self.platforms);
        match platforms.get_mut(&platform.platform_number) {
            Some(existing) => {
                existing.platform_type = platform.platform_type.clone();
                existing.platform_maker = platform.platform_maker.clone();
                existing.end_mission_date = platform.end_mission_date;
                existing.network_type = platform.network_type.clone();
                debug!("Updated platform {}", platform.platform_number);
            }
            None => {
                platforms.insert(platform.platform_number.clone(), platform.clone());
                debug!("Created platform {}", platform.platform_number);
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_cycle(&self, cycle: &Cycle) -> Result<()> {
        self.require_platform(&cycle.platform_number)?;
        guard(&self.cycles).insert(
            (cycle.platform_number.clone(), cycle.cycle_number),
            cycle.clone(),
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_measurements_batch(&self, batch: &[Measurement]) -> Result<usize> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if guard(&self.failing_batches).contains(&call) {
            return Err(IngestError::persistence(format!(
                "injected failure on batch call {call}"
            )));
        }
        {
            let cycles = guard(&self.cycles);
            if let Some(orphan) = batch.iter().find(|m| {
                !cycles.contains_key(&(m.platform_number.clone(), m.cycle_number))
            }) {
                return Err(IngestError::persistence(format!(
                    "cycle {} of {} is not stored",
                    orphan.cycle_number, orphan.platform_number
                )));
            }
        }
        let mut measurements = guard(&self.measurements);
        for m in batch {
            measurements.insert(
                (m.platform_number.clone(), m.cycle_number, m.level_index),
                m.clone(),
            );
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(batch.len())
    }

    async fn record_run(&self, run: &IngestRun) -> Result<()> {
        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(IngestError::persistence("run log unavailable"));
        }
        guard(&self.runs).push(run.clone());
        Ok(())
    }

    async fn platform_summary(&self, platform_number: &str) -> Result<Option<PlatformSummary>> {
        let Some(platform) = self.platform(platform_number) else {
            return Ok(None);
        };
        let cycles: Vec<Cycle> = guard(&self.cycles)
            .values()
            .filter(|c| c.platform_number == platform_number)
            .cloned()
            .collect();
        let measurement_count = guard(&self.measurements)
            .keys()
            .filter(|(p, _, _)| p == platform_number)
            .count();
        let dates: Vec<DateTime<Utc>> = cycles.iter().filter_map(|c| c.profile_date).collect();
        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };
        Ok(Some(PlatformSummary {
            platform_number: platform.platform_number,
            platform_type: platform.platform_type,
            network_type: platform.network_type,
            archive_center: platform.archive_center,
            cycle_count: cycles.len(),
            measurement_count,
            first_profile: dates.iter().min().copied(),
            last_profile: dates.iter().max().copied(),
            mean_latitude: mean(cycles.iter().filter_map(|c| c.latitude).collect()),
            mean_longitude: mean(cycles.iter().filter_map(|c| c.longitude).collect()),
        }))
    }
}
