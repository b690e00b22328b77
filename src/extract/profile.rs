use super::Extraction;
use crate::accessor::Accessor;
use crate::constants::*;
use crate::dataset::Dataset;
use crate::error::{IngestError, Result};
use crate::models::{Cycle, Measurement, Reading};
use crate::source::{ConnectedSource, DatasetKind};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, instrument, warn};

/// Cycles and levels of one platform, in source order.
#[derive(Debug, Clone, Default)]
pub struct ProfileRecords {
    pub cycles: Vec<Cycle>,
    pub measurements: Vec<Measurement>,
    pub skipped: Vec<SkippedCycle>,
    pub dropped_levels: usize,
}

/// A profile index whose cycle could not be built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCycle {
    pub profile_index: usize,
    pub reason: String,
}

#[instrument(skip(source), fields(mirror = %source.mirror.name))]
pub async fn extract_cycles(
    source: &ConnectedSource,
    identifier: &str,
) -> Result<Extraction<ProfileRecords>> {
    let opened = source.open(DatasetKind::Profile).await?;
    let records = cycles_from_dataset(&opened.dataset, identifier);
    Ok(Extraction {
        records,
        checksum: opened.checksum.clone(),
    })
}

/// Build every cycle of a combined-profile dataset. A cycle that fails is
/// skipped and recorded; the rest are still built.
pub fn cycles_from_dataset(dataset: &Dataset, identifier: &str) -> ProfileRecords {
    let profiles = profile_count(dataset);
    let levels = dataset.dimension_len(N_LEVELS).unwrap_or(0);
    debug!("{} has {} profiles of {} levels", identifier, profiles, levels);

    let mut records = ProfileRecords::default();
    for index in 0..profiles {
        match build_cycle(dataset, identifier, index, levels) {
            Ok((cycle, measurements, dropped)) => {
                records.cycles.push(cycle);
                records.measurements.extend(measurements);
                records.dropped_levels += dropped;
            }
            Err(e) => {
                warn!(cycle_index = index, reason = %e, "Skipping cycle of {}", identifier);
                counter!("argo_cycles_skipped_total").increment(1);
                records.skipped.push(SkippedCycle {
                    profile_index: index,
                    reason: e.to_string(),
                });
            }
        }
    }
    records
}

fn profile_count(dataset: &Dataset) -> usize {
    dataset.dimension_len(N_PROF).unwrap_or_else(|| {
        dataset
            .variable(CYCLE_NUMBER)
            .and_then(|v| v.dims.first())
            .map(|d| d.len)
            .unwrap_or(0)
    })
}

fn build_cycle(
    dataset: &Dataset,
    identifier: &str,
    index: usize,
    levels: usize,
) -> Result<(Cycle, Vec<Measurement>, usize)> {
    let at = [index];
    let text = |field: &str| Accessor::text(dataset, field, &at);
    let number = |field: &str| Accessor::number(dataset, field, &at);

    let cycle_number = Accessor::integer(dataset, CYCLE_NUMBER, &at).ok_or_else(|| {
        IngestError::CycleProcessing {
            index,
            message: "cycle number is missing".to_string(),
        }
    })?;
    if cycle_number < 0 {
        return Err(IngestError::CycleProcessing {
            index,
            message: format!("negative cycle number {cycle_number}"),
        });
    }

    let cycle = Cycle {
        platform_number: identifier.to_string(),
        cycle_number,
        profile_index: index,
        profile_date: Accessor::instant(dataset, JULD, &at),
        juld_qc: text(JULD_QC),
        latitude: number(LATITUDE),
        longitude: number(LONGITUDE),
        position_qc: text(POSITION_QC),
        positioning_system: text(POSITIONING_SYSTEM),
        profile_pres_qc: text(PROFILE_PRES_QC),
        profile_temp_qc: text(PROFILE_TEMP_QC),
        profile_psal_qc: text(PROFILE_PSAL_QC),
        vertical_sampling_scheme: text(VERTICAL_SAMPLING_SCHEME),
        config_mission_number: Accessor::integer(dataset, CONFIG_MISSION_NUMBER, &at),
        data_mode: text(DATA_MODE),
        direction: text(DIRECTION),
        data_centre: text(DATA_CENTRE),
        dc_reference: text(DC_REFERENCE),
        data_state_indicator: text(DATA_STATE_INDICATOR),
    };

    let mut measurements = Vec::with_capacity(levels);
    let mut dropped = 0;
    for level in 0..levels {
        let pressure = reading(dataset, PRES, index, level);
        let Some(mut measurement) =
            Measurement::from_pressure(identifier, cycle_number, level as i64, pressure)
        else {
            dropped += 1;
            continue;
        };
        measurement.temperature = reading(dataset, TEMP, index, level);
        measurement.salinity = reading(dataset, PSAL, index, level);
        measurement.doxy = reading(dataset, DOXY, index, level);
        measurement.chla = reading(dataset, CHLA, index, level);
        measurement.bbp700 = reading(dataset, BBP700, index, level);
        measurement.nitrate = reading(dataset, NITRATE, index, level);
        measurement.ph_in_situ_total = reading(dataset, PH_IN_SITU_TOTAL, index, level);
        measurements.push(measurement);
    }
    Ok((cycle, measurements, dropped))
}

fn reading(dataset: &Dataset, parameter: &str, profile: usize, level: usize) -> Reading {
    let at = [profile, level];
    Reading {
        value: Accessor::number(dataset, parameter, &at),
        qc: Accessor::text(dataset, &parameter_field(parameter, QC_SUFFIX), &at),
        adjusted: Accessor::number(dataset, &parameter_field(parameter, ADJUSTED_SUFFIX), &at),
        adjusted_qc: Accessor::text(dataset, &parameter_field(parameter, ADJUSTED_QC_SUFFIX), &at),
        adjusted_error: Accessor::number(
            dataset,
            &parameter_field(parameter, ADJUSTED_ERROR_SUFFIX),
            &at,
        ),
    }
}
