//! Archive layout and Argo variable name constants shared across the crate.
//!
//! These mirror the conventions of the Argo GDAC file tree
//! (`dac/<center>/<wmo>/<wmo>_meta.nc`, `<wmo>_prof.nc`).

// Default mirrors, in priority order
pub const IFREMER_HTTPS: (&str, &str) = ("Ifremer HTTPS", "https://data-argo.ifremer.fr");
pub const IFREMER_FTP: (&str, &str) = ("Ifremer FTP", "ftp://ftp.ifremer.fr/ifremer/argo");
pub const GODAE_HTTPS: (&str, &str) = ("US GODAE HTTPS", "https://usgodae.org/pub/outgoing/argo");
pub const AWS_S3: (&str, &str) = ("AWS S3 sandbox", "s3://argo-gdac-sandbox/pub");

/// Data assembly centres probed when a platform's centre is unknown.
pub const ARCHIVE_CENTERS: [&str; 11] = [
    "coriolis", "aoml", "bodc", "csio", "csiro", "incois", "jma", "kma", "kordi", "meds",
    "nmdis",
];

pub const DAC_DIR: &str = "dac";
pub const META_SUFFIX: &str = "_meta.nc";
pub const PROF_SUFFIX: &str = "_prof.nc";

// Dimensions
pub const N_PROF: &str = "N_PROF";
pub const N_LEVELS: &str = "N_LEVELS";

// Metadata dataset variables
pub const PLATFORM_NUMBER: &str = "PLATFORM_NUMBER";
pub const PLATFORM_TYPE: &str = "PLATFORM_TYPE";
pub const PLATFORM_MAKER: &str = "PLATFORM_MAKER";
pub const FLOAT_SERIAL_NO: &str = "FLOAT_SERIAL_NO";
pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const PI_NAME: &str = "PI_NAME";
pub const LAUNCH_DATE: &str = "LAUNCH_DATE";
pub const LAUNCH_LATITUDE: &str = "LAUNCH_LATITUDE";
pub const LAUNCH_LONGITUDE: &str = "LAUNCH_LONGITUDE";
pub const DEPLOYMENT_PLATFORM: &str = "DEPLOYMENT_PLATFORM";
pub const DEPLOYMENT_CRUISE_ID: &str = "DEPLOYMENT_CRUISE_ID";
pub const START_DATE: &str = "START_DATE";
pub const END_MISSION_DATE: &str = "END_MISSION_DATE";
pub const BATTERY_TYPE: &str = "BATTERY_TYPE";
pub const FIRMWARE_VERSION: &str = "FIRMWARE_VERSION";
pub const FLOAT_OWNER: &str = "FLOAT_OWNER";
pub const OPERATING_INSTITUTION: &str = "OPERATING_INSTITUTION";
pub const PARAMETER: &str = "PARAMETER";

// Profile dataset per-cycle variables
pub const CYCLE_NUMBER: &str = "CYCLE_NUMBER";
pub const JULD: &str = "JULD";
pub const JULD_QC: &str = "JULD_QC";
pub const LATITUDE: &str = "LATITUDE";
pub const LONGITUDE: &str = "LONGITUDE";
pub const POSITION_QC: &str = "POSITION_QC";
pub const POSITIONING_SYSTEM: &str = "POSITIONING_SYSTEM";
pub const PROFILE_PRES_QC: &str = "PROFILE_PRES_QC";
pub const PROFILE_TEMP_QC: &str = "PROFILE_TEMP_QC";
pub const PROFILE_PSAL_QC: &str = "PROFILE_PSAL_QC";
pub const VERTICAL_SAMPLING_SCHEME: &str = "VERTICAL_SAMPLING_SCHEME";
pub const CONFIG_MISSION_NUMBER: &str = "CONFIG_MISSION_NUMBER";
pub const DATA_MODE: &str = "DATA_MODE";
pub const DIRECTION: &str = "DIRECTION";
pub const DATA_CENTRE: &str = "DATA_CENTRE";
pub const DC_REFERENCE: &str = "DC_REFERENCE";
pub const DATA_STATE_INDICATOR: &str = "DATA_STATE_INDICATOR";

// Per-level parameters
pub const PRES: &str = "PRES";
pub const TEMP: &str = "TEMP";
pub const PSAL: &str = "PSAL";
pub const DOXY: &str = "DOXY";
pub const CHLA: &str = "CHLA";
pub const BBP700: &str = "BBP700";
pub const NITRATE: &str = "NITRATE";
pub const PH_IN_SITU_TOTAL: &str = "PH_IN_SITU_TOTAL";

pub const BGC_PARAMETERS: [&str; 5] = [DOXY, CHLA, BBP700, NITRATE, PH_IN_SITU_TOTAL];

pub const NETWORK_BGC: &str = "BGC";
pub const NETWORK_CORE: &str = "CORE";

/// Argo conventional fill values for numeric fields (`99999.` for
/// measurements, `999999.` for JULD).
pub const ARGO_FILL_VALUES: [f64; 2] = [99999.0, 999999.0];

/// Attribute naming a variable's declared fill value.
pub const FILL_VALUE_ATTR: &str = "_FillValue";

/// Argo reference date for JULD day counts.
pub const JULD_EPOCH: &str = "1950-01-01T00:00:00Z";

/// Sub-field name for a parameter, e.g. `TEMP` + `_ADJUSTED_QC`.
pub fn parameter_field(parameter: &str, suffix: &str) -> String {
    format!("{parameter}{suffix}")
}

pub const QC_SUFFIX: &str = "_QC";
pub const ADJUSTED_SUFFIX: &str = "_ADJUSTED";
pub const ADJUSTED_QC_SUFFIX: &str = "_ADJUSTED_QC";
pub const ADJUSTED_ERROR_SUFFIX: &str = "_ADJUSTED_ERROR";

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_ATTEMPTS: usize = 4;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
