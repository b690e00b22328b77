use super::Store;
use crate::error::{IngestError, Result};
use crate::models::{Cycle, IngestRun, Measurement, Platform, PlatformSummary, Reading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS platforms (
        platform_number       TEXT PRIMARY KEY,
        platform_type         TEXT,
        platform_maker        TEXT,
        float_serial_no       TEXT,
        project_name          TEXT,
        pi_name               TEXT,
        launch_date           TEXT,
        launch_latitude       REAL NOT NULL,
        launch_longitude      REAL NOT NULL,
        deployment_platform   TEXT,
        deployment_cruise_id  TEXT,
        start_date            TEXT,
        end_mission_date      TEXT,
        battery_type          TEXT,
        firmware_version      TEXT,
        float_owner           TEXT,
        operating_institution TEXT,
        archive_center        TEXT,
        network_type          TEXT,
        created_at            TEXT NOT NULL,
        updated_at            TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cycles (
        platform_number          TEXT NOT NULL REFERENCES platforms(platform_number),
        cycle_number             INTEGER NOT NULL,
        profile_index            INTEGER NOT NULL,
        profile_date             TEXT,
        juld_qc                  TEXT,
        latitude                 REAL,
        longitude                REAL,
        position_qc              TEXT,
        positioning_system       TEXT,
        profile_pres_qc          TEXT,
        profile_temp_qc          TEXT,
        profile_psal_qc          TEXT,
        vertical_sampling_scheme TEXT,
        config_mission_number    INTEGER,
        data_mode                TEXT,
        direction                TEXT,
        data_centre              TEXT,
        dc_reference             TEXT,
        data_state_indicator     TEXT,
        updated_at               TEXT NOT NULL,
        PRIMARY KEY (platform_number, cycle_number)
    );
    CREATE TABLE IF NOT EXISTS ingest_runs (
        run_id               TEXT PRIMARY KEY,
        platform_number      TEXT NOT NULL,
        mirror               TEXT,
        strategy             TEXT,
        checksums            TEXT NOT NULL,
        status               TEXT NOT NULL,
        cycles_written       INTEGER NOT NULL,
        measurements_written INTEGER NOT NULL,
        failed_batches       INTEGER NOT NULL,
        message              TEXT,
        started_at           TEXT NOT NULL,
        finished_at          TEXT NOT NULL
    );
"#;

/// Parameters stored per level, each as value/qc/adjusted/adjusted_qc/
/// adjusted_error columns.
const READING_PREFIXES: [&str; 8] = [
    "pres",
    "temp",
    "psal",
    "doxy",
    "chla",
    "bbp700",
    "nitrate",
    "ph_in_situ_total",
];

fn reading_columns() -> Vec<String> {
    READING_PREFIXES
        .iter()
        .flat_map(|p| {
            [
                p.to_string(),
                format!("{p}_qc"),
                format!("{p}_adjusted"),
                format!("{p}_adjusted_qc"),
                format!("{p}_adjusted_error"),
            ]
        })
        .collect()
}

static MEASUREMENTS_DDL: Lazy<String> = Lazy::new(|| {
    let columns: Vec<String> = reading_columns()
        .into_iter()
        .map(|c| {
            let kind = if c.ends_with("_qc") { "TEXT" } else { "REAL" };
            let not_null = if c == "pres" { " NOT NULL" } else { "" };
            format!("        {c} {kind}{not_null},")
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS measurements (
        platform_number TEXT NOT NULL,
        cycle_number    INTEGER NOT NULL,
        level_index     INTEGER NOT NULL,
{}
        PRIMARY KEY (platform_number, cycle_number, level_index),
        FOREIGN KEY (platform_number, cycle_number)
            REFERENCES cycles(platform_number, cycle_number)
    );",
        columns.join("\n")
    )
});

static MEASUREMENT_UPSERT: Lazy<String> = Lazy::new(|| {
    let values = reading_columns();
    let mut columns = vec![
        "platform_number".to_string(),
        "cycle_number".to_string(),
        "level_index".to_string(),
    ];
    columns.extend(values.iter().cloned());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = values
        .iter()
        .map(|c| format!("{c}=excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO measurements ({}) VALUES ({})
         ON CONFLICT(platform_number, cycle_number, level_index) DO UPDATE SET {}",
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
});

const PLATFORM_UPSERT: &str = "
    INSERT INTO platforms (
        platform_number, platform_type, platform_maker, float_serial_no, project_name,
        pi_name, launch_date, launch_latitude, launch_longitude, deployment_platform,
        deployment_cruise_id, start_date, end_mission_date, battery_type, firmware_version,
        float_owner, operating_institution, archive_center, network_type, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)
    ON CONFLICT(platform_number) DO UPDATE SET
        platform_type=excluded.platform_type,
        platform_maker=excluded.platform_maker,
        end_mission_date=excluded.end_mission_date,
        network_type=excluded.network_type,
        updated_at=excluded.updated_at";

const CYCLE_UPSERT: &str = "
    INSERT INTO cycles (
        platform_number, cycle_number, profile_index, profile_date, juld_qc, latitude,
        longitude, position_qc, positioning_system, profile_pres_qc, profile_temp_qc,
        profile_psal_qc, vertical_sampling_scheme, config_mission_number, data_mode, direction,
        data_centre, dc_reference, data_state_indicator, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
    ON CONFLICT(platform_number, cycle_number) DO UPDATE SET
        profile_index=excluded.profile_index,
        profile_date=excluded.profile_date,
        juld_qc=excluded.juld_qc,
        latitude=excluded.latitude,
        longitude=excluded.longitude,
        position_qc=excluded.position_qc,
        positioning_system=excluded.positioning_system,
        profile_pres_qc=excluded.profile_pres_qc,
        profile_temp_qc=excluded.profile_temp_qc,
        profile_psal_qc=excluded.profile_psal_qc,
        vertical_sampling_scheme=excluded.vertical_sampling_scheme,
        config_mission_number=excluded.config_mission_number,
        data_mode=excluded.data_mode,
        direction=excluded.direction,
        data_centre=excluded.data_centre,
        dc_reference=excluded.dc_reference,
        data_state_indicator=excluded.data_state_indicator,
        updated_at=excluded.updated_at";

fn instant(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn parse_instant(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn real(value: Option<f64>) -> Value {
    value.map(Value::Real).unwrap_or(Value::Null)
}

fn text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn reading_values(reading: &Reading, out: &mut Vec<Value>) {
    out.push(real(reading.value));
    out.push(text(&reading.qc));
    out.push(real(reading.adjusted));
    out.push(text(&reading.adjusted_qc));
    out.push(real(reading.adjusted_error));
}

fn measurement_values(m: &Measurement) -> Vec<Value> {
    let mut values = Vec::with_capacity(3 + READING_PREFIXES.len() * 5);
    values.push(Value::Text(m.platform_number.clone()));
    values.push(Value::Integer(m.cycle_number));
    values.push(Value::Integer(m.level_index));
    for (_, reading) in m.readings() {
        reading_values(reading, &mut values);
    }
    // pressure is authoritative for the level's NOT NULL value column
    values[3] = Value::Real(m.pressure);
    values
}

/// SQLite-backed store. Every operation opens its own connection, so no
/// connection or transaction outlives one unit of work.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }

    fn upsert_cycle_on(conn: &Connection, cycle: &Cycle, now: &str) -> rusqlite::Result<usize> {
        conn.execute(
            CYCLE_UPSERT,
            params![
                cycle.platform_number,
                cycle.cycle_number,
                cycle.profile_index as i64,
                instant(cycle.profile_date),
                cycle.juld_qc,
                cycle.latitude,
                cycle.longitude,
                cycle.position_qc,
                cycle.positioning_system,
                cycle.profile_pres_qc,
                cycle.profile_temp_qc,
                cycle.profile_psal_qc,
                cycle.vertical_sampling_scheme,
                cycle.config_mission_number,
                cycle.data_mode,
                cycle.direction,
                cycle.data_centre,
                cycle.dc_reference,
                cycle.data_state_indicator,
                now,
            ],
        )
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&MEASUREMENTS_DDL)?;
        info!("Schema ready at {}", self.path.display());
        Ok(())
    }

    async fn platform_exists(&self, platform_number: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM platforms WHERE platform_number = ?1",
                params![platform_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn upsert_platform(&self, platform: &Platform) -> Result<()> {
        let (Some(lat), Some(lon)) = (platform.launch_latitude, platform.launch_longitude) else {
            return Err(IngestError::persistence(format!(
                "platform {} has no launch position",
                platform.platform_number
            )));
        };
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;
        conn.execute(
            PLATFORM_UPSERT,
            params![
                platform.platform_number,
                platform.platform_type,
                platform.platform_maker,
                platform.float_serial_no,
                platform.project_name,
                platform.pi_name,
                instant(platform.launch_date),
                lat,
                lon,
                platform.deployment_platform,
                platform.deployment_cruise_id,
                instant(platform.start_date),
                instant(platform.end_mission_date),
                platform.battery_type,
                platform.firmware_version,
                platform.float_owner,
                platform.operating_institution,
                platform.archive_center,
                platform.network_type,
                now,
            ],
        )?;
        debug!("Upserted platform {}", platform.platform_number);
        Ok(())
    }

    async fn upsert_cycle(&self, cycle: &Cycle) -> Result<()> {
        let conn = self.connect()?;
        Self::upsert_cycle_on(&conn, cycle, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    async fn upsert_cycles(&self, cycles: &[Cycle]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for cycle in cycles {
            Self::upsert_cycle_on(&tx, cycle, &now)?;
        }
        tx.commit()?;
        debug!("Upserted {} cycles", cycles.len());
        Ok(cycles.len())
    }

    async fn upsert_measurements_batch(&self, batch: &[Measurement]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&MEASUREMENT_UPSERT)?;
            for m in batch {
                stmt.execute(params_from_iter(measurement_values(m)))?;
            }
        }
        tx.commit()?;
        Ok(batch.len())
    }

    async fn record_run(&self, run: &IngestRun) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO ingest_runs (
                run_id, platform_number, mirror, strategy, checksums, status, cycles_written,
                measurements_written, failed_batches, message, started_at, finished_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.run_id.to_string(),
                run.platform_number,
                run.mirror,
                run.strategy,
                serde_json::to_string(&run.checksums)?,
                run.status.as_str(),
                run.cycles_written as i64,
                run.measurements_written as i64,
                run.failed_batches as i64,
                run.message,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn platform_summary(&self, platform_number: &str) -> Result<Option<PlatformSummary>> {
        let conn = self.connect()?;
        let summary = conn
            .query_row(
                "SELECT p.platform_number, p.platform_type, p.network_type, p.archive_center,
                        COUNT(c.cycle_number), MIN(c.profile_date), MAX(c.profile_date),
                        AVG(c.latitude), AVG(c.longitude),
                        (SELECT COUNT(*) FROM measurements m WHERE m.platform_number = p.platform_number)
                 FROM platforms p
                 LEFT JOIN cycles c ON c.platform_number = p.platform_number
                 WHERE p.platform_number = ?1
                 GROUP BY p.platform_number",
                params![platform_number],
                |row| {
                    Ok(PlatformSummary {
                        platform_number: row.get(0)?,
                        platform_type: row.get(1)?,
                        network_type: row.get(2)?,
                        archive_center: row.get(3)?,
                        cycle_count: row.get::<_, i64>(4)? as usize,
                        first_profile: parse_instant(row.get(5)?),
                        last_profile: parse_instant(row.get(6)?),
                        mean_latitude: row.get(7)?,
                        mean_longitude: row.get(8)?,
                        measurement_count: row.get::<_, i64>(9)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn platform(platform_type: &str) -> Platform {
        Platform {
            platform_number: "2902746".into(),
            platform_type: Some(platform_type.into()),
            pi_name: Some("Original PI".into()),
            launch_latitude: Some(-20.0),
            launch_longitude: Some(65.0),
            ..Platform::default()
        }
    }

    async fn store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("argo.db")).unwrap();
        store.init_schema().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn platform_conflict_updates_only_mutable_fields() {
        let (_dir, store) = store().await;
        store.upsert_platform(&platform("APEX")).await.unwrap();
        let mut changed = platform("NAVIS_A");
        changed.pi_name = Some("Someone Else".into());
        store.upsert_platform(&changed).await.unwrap();

        let conn = store.connect().unwrap();
        let (kind, pi): (String, String) = conn
            .query_row(
                "SELECT platform_type, pi_name FROM platforms WHERE platform_number = '2902746'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(kind, "NAVIS_A");
        assert_eq!(pi, "Original PI");
        assert!(store.platform_exists("2902746").await.unwrap());
        assert!(!store.platform_exists("1").await.unwrap());
    }

    #[tokio::test]
    async fn cycle_requires_stored_platform() {
        let (_dir, store) = store().await;
        let orphan = Cycle {
            platform_number: "404".into(),
            cycle_number: 1,
            ..Cycle::default()
        };
        assert!(store.upsert_cycle(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn measurement_upsert_overwrites_values() {
        let (_dir, store) = store().await;
        store.upsert_platform(&platform("APEX")).await.unwrap();
        let cycle = Cycle {
            platform_number: "2902746".into(),
            cycle_number: 7,
            ..Cycle::default()
        };
        store.upsert_cycle(&cycle).await.unwrap();

        let mut level = Measurement::from_pressure(
            "2902746",
            7,
            0,
            Reading {
                value: Some(5.0),
                ..Reading::default()
            },
        )
        .unwrap();
        level.temperature.value = Some(25.0);
        store.upsert_measurements_batch(&[level.clone()]).await.unwrap();
        level.temperature.value = Some(24.5);
        level.temperature.qc = Some("2".into());
        store.upsert_measurements_batch(&[level]).await.unwrap();

        let conn = store.connect().unwrap();
        let (rows, temp, qc): (i64, f64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(temp), MAX(temp_qc) FROM measurements",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(temp, 24.5);
        assert_eq!(qc, "2");
    }

    #[tokio::test]
    async fn summary_aggregates_cycles_and_levels() {
        let (_dir, store) = store().await;
        store.upsert_platform(&platform("APEX")).await.unwrap();
        let cycles: Vec<Cycle> = (1..=2)
            .map(|n| Cycle {
                platform_number: "2902746".into(),
                cycle_number: n,
                latitude: Some(-10.0 * n as f64),
                longitude: Some(70.0),
                profile_date: DateTime::parse_from_rfc3339(&format!("2021-0{n}-01T00:00:00Z"))
                    .ok()
                    .map(|t| t.with_timezone(&Utc)),
                ..Cycle::default()
            })
            .collect();
        assert_eq!(store.upsert_cycles(&cycles).await.unwrap(), 2);

        let summary = store.platform_summary("2902746").await.unwrap().unwrap();
        assert_eq!(summary.cycle_count, 2);
        assert_eq!(summary.measurement_count, 0);
        assert_eq!(summary.mean_latitude, Some(-15.0));
        assert_eq!(
            summary.first_profile.map(|t| t.to_rfc3339()).as_deref(),
            Some("2021-01-01T00:00:00+00:00")
        );
        assert!(store.platform_summary("missing").await.unwrap().is_none());
    }
}
