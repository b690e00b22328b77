use super::Extraction;
use crate::accessor::Accessor;
use crate::constants::*;
use crate::dataset::Dataset;
use crate::error::{IngestError, Result};
use crate::models::Platform;
use crate::source::{ConnectedSource, DatasetKind};
use tracing::{debug, instrument, warn};

/// Open the platform's metadata dataset and build its [`Platform`]. The
/// dataset's cached copy is released before this returns, whatever the
/// outcome.
#[instrument(skip(source), fields(mirror = %source.mirror.name))]
pub async fn extract_metadata(
    source: &ConnectedSource,
    identifier: &str,
) -> Result<Extraction<Platform>> {
    let opened = source.open(DatasetKind::Metadata).await?;
    let platform =
        platform_from_dataset(&opened.dataset, identifier, &source.location.archive_center)?;
    Ok(Extraction {
        records: platform,
        checksum: opened.checksum.clone(),
    })
}

/// Build a platform record. Fails only when the identifier or a launch
/// coordinate is missing; every other field is optional.
pub fn platform_from_dataset(
    dataset: &Dataset,
    identifier: &str,
    archive_center: &str,
) -> Result<Platform> {
    let text = |field: &str| Accessor::text(dataset, field, &[]);
    let instant = |field: &str| Accessor::instant(dataset, field, &[]);

    let recorded = text(PLATFORM_NUMBER);
    let platform_number = match (identifier.trim(), recorded.as_deref()) {
        ("", Some(recorded)) => recorded.to_string(),
        ("", None) => {
            return Err(IngestError::MissingRequiredField {
                identifier: String::new(),
                field: PLATFORM_NUMBER.to_string(),
            })
        }
        (requested, Some(recorded)) if requested != recorded => {
            warn!("Metadata for {} records platform number {}", requested, recorded);
            requested.to_string()
        }
        (requested, _) => requested.to_string(),
    };

    let missing = |field: &str| IngestError::MissingRequiredField {
        identifier: platform_number.clone(),
        field: field.to_string(),
    };
    let launch_latitude =
        Accessor::number(dataset, LAUNCH_LATITUDE, &[]).ok_or_else(|| missing(LAUNCH_LATITUDE))?;
    let launch_longitude = Accessor::number(dataset, LAUNCH_LONGITUDE, &[])
        .ok_or_else(|| missing(LAUNCH_LONGITUDE))?;

    let network_type = classify_network(dataset);
    debug!("{} classified as {} platform", platform_number, network_type);

    Ok(Platform {
        platform_type: text(PLATFORM_TYPE),
        platform_maker: text(PLATFORM_MAKER),
        float_serial_no: text(FLOAT_SERIAL_NO),
        project_name: text(PROJECT_NAME),
        pi_name: text(PI_NAME),
        launch_date: instant(LAUNCH_DATE),
        launch_latitude: Some(launch_latitude),
        launch_longitude: Some(launch_longitude),
        deployment_platform: text(DEPLOYMENT_PLATFORM),
        deployment_cruise_id: text(DEPLOYMENT_CRUISE_ID),
        start_date: instant(START_DATE),
        end_mission_date: instant(END_MISSION_DATE),
        battery_type: text(BATTERY_TYPE),
        firmware_version: text(FIRMWARE_VERSION),
        float_owner: text(FLOAT_OWNER),
        operating_institution: text(OPERATING_INSTITUTION),
        archive_center: Some(archive_center.to_string()).filter(|c| !c.is_empty()),
        network_type: Some(network_type.to_string()),
        platform_number,
    })
}

/// `BGC` when any biogeochemical parameter is declared, otherwise `CORE`.
pub fn classify_network(dataset: &Dataset) -> &'static str {
    let declared = Accessor::texts(dataset, PARAMETER);
    if declared
        .iter()
        .any(|p| BGC_PARAMETERS.contains(&p.as_str()))
    {
        NETWORK_BGC
    } else {
        NETWORK_CORE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dimension, VarData, Variable};

    fn metadata(lat: Option<f64>, parameters: &[&str]) -> Dataset {
        let mut ds = Dataset::new();
        ds.insert(Variable::chars(
            PLATFORM_NUMBER,
            vec![Dimension::new("STRING8", 8)],
            &["6903569"],
        ))
        .unwrap();
        ds.insert(Variable::chars(
            PLATFORM_TYPE,
            vec![Dimension::new("STRING32", 32)],
            &["APEX"],
        ))
        .unwrap();
        ds.insert(Variable::chars(
            LAUNCH_DATE,
            vec![Dimension::new("DATE_TIME", 14)],
            &["20200115083000"],
        ))
        .unwrap();
        if let Some(lat) = lat {
            ds.insert(Variable::new(LAUNCH_LATITUDE, vec![], VarData::Double(vec![lat])))
                .unwrap();
        }
        ds.insert(Variable::new(LAUNCH_LONGITUDE, vec![], VarData::Double(vec![72.25])))
            .unwrap();
        if !parameters.is_empty() {
            ds.insert(Variable::chars(
                PARAMETER,
                vec![
                    Dimension::new("N_PARAM", parameters.len()),
                    Dimension::new("STRING16", 16),
                ],
                parameters,
            ))
            .unwrap();
        }
        ds
    }

    #[test]
    fn builds_platform_with_optional_fields_defaulted() {
        let ds = metadata(Some(-10.5), &["PRES", "TEMP", "PSAL"]);
        let platform = platform_from_dataset(&ds, "6903569", "coriolis").unwrap();
        assert_eq!(platform.platform_number, "6903569");
        assert_eq!(platform.platform_type.as_deref(), Some("APEX"));
        assert_eq!(platform.launch_latitude, Some(-10.5));
        assert_eq!(platform.launch_longitude, Some(72.25));
        assert_eq!(
            platform.launch_date.map(|d| d.to_rfc3339()).as_deref(),
            Some("2020-01-15T08:30:00+00:00")
        );
        assert_eq!(platform.pi_name, None);
        assert_eq!(platform.archive_center.as_deref(), Some("coriolis"));
        assert_eq!(platform.network_type.as_deref(), Some(NETWORK_CORE));
    }

    #[test]
    fn missing_launch_latitude_fails_extraction() {
        let ds = metadata(None, &[]);
        let err = platform_from_dataset(&ds, "6903569", "coriolis").unwrap_err();
        assert!(matches!(
            err,
            IngestError::MissingRequiredField { ref field, .. } if field == LAUNCH_LATITUDE
        ));
    }

    #[test]
    fn fill_value_coordinate_counts_as_missing() {
        let ds = metadata(Some(99999.0), &[]);
        assert!(platform_from_dataset(&ds, "6903569", "aoml").is_err());
    }

    #[test]
    fn bgc_parameters_mark_network() {
        let ds = metadata(Some(1.0), &["PRES", "TEMP", "DOXY"]);
        assert_eq!(classify_network(&ds), NETWORK_BGC);
    }

    #[test]
    fn identifier_falls_back_to_recorded_number() {
        let ds = metadata(Some(1.0), &[]);
        let platform = platform_from_dataset(&ds, "  ", "aoml").unwrap();
        assert_eq!(platform.platform_number, "6903569");
    }
}
