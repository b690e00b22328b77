use crate::constants::{LAUNCH_LATITUDE, LAUNCH_LONGITUDE, PLATFORM_NUMBER};
use crate::error::IngestError;
use crate::models::{Cycle, Measurement, Platform};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationStats {
    pub cycles_count: usize,
    pub measurements_count: usize,
    pub avg_measurements_per_cycle: f64,
    pub pressure_measurements: usize,
    pub temperature_measurements: usize,
    pub salinity_measurements: usize,
    pub bgc_measurements: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    /// Report for records rejected before they could be validated, such as
    /// metadata without a launch position.
    pub fn rejected(error: &IngestError) -> Self {
        let message = match error {
            IngestError::MissingRequiredField { field, .. } if field == PLATFORM_NUMBER => {
                "Missing platform identifier".to_string()
            }
            IngestError::MissingRequiredField { field, .. }
                if field == LAUNCH_LATITUDE || field == LAUNCH_LONGITUDE =>
            {
                "Missing launch coordinates".to_string()
            }
            other => other.to_string(),
        };
        warn!(valid = false, errors = 1, warnings = 0, "Records rejected: {}", message);
        Self {
            valid: false,
            errors: vec![message],
            warnings: Vec::new(),
            stats: ValidationStats::default(),
        }
    }

    fn error(&mut self, message: &str) {
        self.valid = false;
        self.errors.push(message.to_string());
    }

    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}

/// Check a platform's extracted records. Stats are filled in whether or not
/// the records are valid.
pub fn validate(
    platform: &Platform,
    cycles: &[Cycle],
    measurements: &[Measurement],
) -> ValidationReport {
    let count = |populated: fn(&Measurement) -> bool| {
        measurements.iter().filter(|m| populated(m)).count()
    };
    let stats = ValidationStats {
        cycles_count: cycles.len(),
        measurements_count: measurements.len(),
        avg_measurements_per_cycle: if cycles.is_empty() {
            0.0
        } else {
            measurements.len() as f64 / cycles.len() as f64
        },
        pressure_measurements: count(|m| m.pressure.is_finite()),
        temperature_measurements: count(|m| m.temperature.is_populated()),
        salinity_measurements: count(|m| m.salinity.is_populated()),
        bgc_measurements: count(Measurement::has_bgc),
    };

    let mut report = ValidationReport {
        valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
        stats,
    };

    if platform.platform_number.trim().is_empty() {
        report.error("Missing platform identifier");
    }
    if platform.launch_latitude.is_none() || platform.launch_longitude.is_none() {
        report.error("Missing launch coordinates");
    }
    if platform.launch_date.is_none() {
        report.warning("Missing launch date");
    }

    if cycles.is_empty() {
        report.error("No cycles found");
    } else {
        let mut seen = HashSet::with_capacity(cycles.len());
        if cycles.iter().any(|c| !seen.insert(c.cycle_number)) {
            report.warning("Duplicate cycle numbers found");
        }
    }

    if report.stats.pressure_measurements == 0 {
        report.error("No pressure measurements found");
    }
    if report.stats.temperature_measurements == 0 {
        report.warning("No temperature measurements found");
    }
    if report.stats.salinity_measurements == 0 {
        report.warning("No salinity measurements found");
    }

    if report.valid {
        info!(
            valid = true,
            errors = 0,
            warnings = report.warnings.len(),
            "Platform {} validated: {} cycles, {} measurements",
            platform.platform_number,
            report.stats.cycles_count,
            report.stats.measurements_count
        );
    } else {
        warn!(
            valid = false,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Platform {} failed validation: {}",
            platform.platform_number,
            report.errors.join("; ")
        );
    }
    report
}
