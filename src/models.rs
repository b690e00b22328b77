use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One sensor unit. Launch coordinates are optional here only so that an
/// incomplete record can still be validated and reported.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Platform {
    pub platform_number: String,
    pub platform_type: Option<String>,
    pub platform_maker: Option<String>,
    pub float_serial_no: Option<String>,
    pub project_name: Option<String>,
    pub pi_name: Option<String>,
    pub launch_date: Option<DateTime<Utc>>,
    pub launch_latitude: Option<f64>,
    pub launch_longitude: Option<f64>,
    pub deployment_platform: Option<String>,
    pub deployment_cruise_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_mission_date: Option<DateTime<Utc>>,
    pub battery_type: Option<String>,
    pub firmware_version: Option<String>,
    pub float_owner: Option<String>,
    pub operating_institution: Option<String>,
    pub archive_center: Option<String>,
    pub network_type: Option<String>,
}

/// One dive/profile of a platform, keyed by (platform_number, cycle_number).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cycle {
    pub platform_number: String,
    pub cycle_number: i64,
    pub profile_index: usize,
    pub profile_date: Option<DateTime<Utc>>,
    pub juld_qc: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub position_qc: Option<String>,
    pub positioning_system: Option<String>,
    pub profile_pres_qc: Option<String>,
    pub profile_temp_qc: Option<String>,
    pub profile_psal_qc: Option<String>,
    pub vertical_sampling_scheme: Option<String>,
    pub config_mission_number: Option<i64>,
    pub data_mode: Option<String>,
    pub direction: Option<String>,
    pub data_centre: Option<String>,
    pub dc_reference: Option<String>,
    pub data_state_indicator: Option<String>,
}

/// Raw, adjusted and quality-control values of one parameter at one level.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    pub value: Option<f64>,
    pub qc: Option<String>,
    pub adjusted: Option<f64>,
    pub adjusted_qc: Option<String>,
    pub adjusted_error: Option<f64>,
}

impl Reading {
    pub fn is_populated(&self) -> bool {
        self.value.is_some()
    }
}

/// One vertical level of a cycle. Keyed by
/// (platform_number, cycle_number, level_index); pressure is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub platform_number: String,
    pub cycle_number: i64,
    pub level_index: i64,
    pub pressure: f64,
    pub pressure_reading: Reading,
    pub temperature: Reading,
    pub salinity: Reading,
    pub doxy: Reading,
    pub chla: Reading,
    pub bbp700: Reading,
    pub nitrate: Reading,
    pub ph_in_situ_total: Reading,
}

impl Measurement {
    /// Builds a level, or `None` when its pressure is missing.
    pub fn from_pressure(
        platform_number: &str,
        cycle_number: i64,
        level_index: i64,
        pressure_reading: Reading,
    ) -> Option<Self> {
        let pressure = pressure_reading.value?;
        Some(Self {
            platform_number: platform_number.to_string(),
            cycle_number,
            level_index,
            pressure,
            pressure_reading,
            temperature: Reading::default(),
            salinity: Reading::default(),
            doxy: Reading::default(),
            chla: Reading::default(),
            bbp700: Reading::default(),
            nitrate: Reading::default(),
            ph_in_situ_total: Reading::default(),
        })
    }

    /// Parameter readings in storage column order.
    pub fn readings(&self) -> [(&'static str, &Reading); 8] {
        [
            ("pres", &self.pressure_reading),
            ("temp", &self.temperature),
            ("psal", &self.salinity),
            ("doxy", &self.doxy),
            ("chla", &self.chla),
            ("bbp700", &self.bbp700),
            ("nitrate", &self.nitrate),
            ("ph_in_situ_total", &self.ph_in_situ_total),
        ]
    }

    pub fn has_bgc(&self) -> bool {
        [&self.doxy, &self.chla, &self.bbp700, &self.nitrate, &self.ph_in_situ_total]
            .iter()
            .any(|r| r.is_populated())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    PartiallyPersisted,
    Skipped,
    OutOfRegion,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyPersisted => "partially_persisted",
            RunStatus::Skipped => "skipped",
            RunStatus::OutOfRegion => "out_of_region",
            RunStatus::Failed => "failed",
        }
    }
}

/// One row of the ingest run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRun {
    pub run_id: Uuid,
    pub platform_number: String,
    pub mirror: Option<String>,
    pub strategy: Option<String>,
    pub checksums: Vec<String>,
    pub status: RunStatus,
    pub cycles_written: usize,
    pub measurements_written: usize,
    pub failed_batches: usize,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Read-side aggregate for one stored platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformSummary {
    pub platform_number: String,
    pub platform_type: Option<String>,
    pub network_type: Option<String>,
    pub archive_center: Option<String>,
    pub cycle_count: usize,
    pub measurement_count: usize,
    pub first_profile: Option<DateTime<Utc>>,
    pub last_profile: Option<DateTime<Utc>>,
    pub mean_latitude: Option<f64>,
    pub mean_longitude: Option<f64>,
}
