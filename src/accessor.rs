//! Safe value access over heterogeneous dataset fields.
//!
//! Every read goes through [`Accessor::get`], which is total: an absent
//! field, an index that does not fit the field's shape, a fill sentinel or
//! a byte sequence that is not UTF-8 all come back as [`Value::Null`].
//! Decode problems are logged at debug level and never surface to callers.

use crate::constants::{ARGO_FILL_VALUES, JULD_EPOCH};
use crate::dataset::{Dataset, VarData, Variable};
use crate::error::{IngestError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

/// A decoded scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Text(String),
    Number(f64),
    Instant(DateTime<Utc>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Instant(t) => Some(*t),
            _ => None,
        }
    }
}

/// Stateless reader; all methods take the dataset explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accessor;

impl Accessor {
    /// Read `field` at `index` (empty slice for no index).
    pub fn get(dataset: &Dataset, field: &str, index: &[usize]) -> Value {
        match try_get(dataset, field, index) {
            Ok(value) => value,
            Err(e) => {
                debug!(field, ?index, error = %e, "field decode failed, treating as null");
                Value::Null
            }
        }
    }

    /// Read `field` as a UTC instant. Understands numeric day counts
    /// relative to the variable's `units` reference (Argo JULD) and textual
    /// timestamps such as `20190312103000` or ISO 8601.
    pub fn get_instant(dataset: &Dataset, field: &str, index: &[usize]) -> Value {
        let raw = Self::get(dataset, field, index);
        let decoded = match &raw {
            Value::Null => return Value::Null,
            Value::Instant(t) => Some(*t),
            Value::Number(days) => {
                let epoch = dataset
                    .variable(field)
                    .and_then(|v| v.text_attribute("units"))
                    .and_then(epoch_from_units)
                    .or_else(default_epoch);
                epoch.and_then(|epoch| days_after(epoch, *days))
            }
            Value::Text(text) => parse_timestamp(text),
        };
        match decoded {
            Some(instant) => Value::Instant(instant),
            None => {
                debug!(field, ?index, raw = ?raw, "unparseable instant, treating as null");
                Value::Null
            }
        }
    }

    pub fn text(dataset: &Dataset, field: &str, index: &[usize]) -> Option<String> {
        match Self::get(dataset, field, index) {
            Value::Text(s) => Some(s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", n as i64)),
            Value::Number(n) => Some(n.to_string()),
            Value::Instant(t) => Some(t.to_rfc3339()),
            Value::Null => None,
        }
    }

    pub fn number(dataset: &Dataset, field: &str, index: &[usize]) -> Option<f64> {
        match Self::get(dataset, field, index) {
            Value::Number(n) => Some(n),
            Value::Text(s) => s.parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn integer(dataset: &Dataset, field: &str, index: &[usize]) -> Option<i64> {
        Self::number(dataset, field, index)
            .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
            .map(|n| n as i64)
    }

    pub fn instant(dataset: &Dataset, field: &str, index: &[usize]) -> Option<DateTime<Utc>> {
        Self::get_instant(dataset, field, index).as_instant()
    }

    /// Every non-empty string of a character field, in storage order.
    /// Entries that are not valid UTF-8 are skipped.
    pub fn texts(dataset: &Dataset, field: &str) -> Vec<String> {
        let Some(variable) = dataset.variable(field) else {
            return Vec::new();
        };
        let VarData::Char(bytes) = &variable.data else {
            return Vec::new();
        };
        let width = dataset.string_width(variable);
        if width == 0 {
            return Vec::new();
        }
        bytes
            .chunks(width)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .map(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn try_get(dataset: &Dataset, field: &str, index: &[usize]) -> Result<Value> {
    let Some(variable) = dataset.variable(field) else {
        return Ok(Value::Null);
    };
    let shape = dataset.logical_shape(variable);
    let offset = element_offset(variable, &shape, index)?;
    match &variable.data {
        VarData::Char(bytes) => {
            decode_text(variable, bytes, offset, dataset.string_width(variable))
        }
        data => {
            let raw = data.number_at(offset).ok_or_else(|| {
                IngestError::Decode(format!("{field}: element {offset} out of range"))
            })?;
            Ok(normalize_number(variable, raw))
        }
    }
}

/// Flat element offset for `index` against the logical shape. A scalar
/// ignores any index; otherwise the index must select exactly one element.
fn element_offset(variable: &Variable, shape: &[usize], index: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Ok(0);
    }
    if index.len() > shape.len() {
        return Err(IngestError::Decode(format!(
            "{}: index {:?} has more dimensions than shape {:?}",
            variable.name, index, shape
        )));
    }
    let remaining: usize = shape[index.len()..].iter().product();
    if remaining != 1 {
        return Err(IngestError::Decode(format!(
            "{}: index {:?} selects {} elements of shape {:?}, not one",
            variable.name, index, remaining, shape
        )));
    }
    let mut offset = 0usize;
    for (axis, (&i, &len)) in index.iter().zip(shape).enumerate() {
        if i >= len {
            return Err(IngestError::Decode(format!(
                "{}: index {} out of range on axis {} (len {})",
                variable.name, i, axis, len
            )));
        }
        offset = offset * len + i;
    }
    // trailing unit-length axes do not move the offset
    Ok(offset)
}

fn decode_text(variable: &Variable, bytes: &[u8], offset: usize, width: usize) -> Result<Value> {
    let start = offset * width;
    let raw = bytes.get(start..start + width).ok_or_else(|| {
        IngestError::Decode(format!("{}: string {} out of range", variable.name, offset))
    })?;
    let text = std::str::from_utf8(raw)
        .map_err(|e| IngestError::Decode(format!("{}: invalid UTF-8: {e}", variable.name)))?;
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Text(trimmed.to_string()))
    }
}

fn normalize_number(variable: &Variable, raw: f64) -> Value {
    if !raw.is_finite() {
        return Value::Null;
    }
    if let Some(fill) = variable.fill_value() {
        if (raw - fill).abs() <= fill.abs() * 1e-6 {
            return Value::Null;
        }
    }
    if ARGO_FILL_VALUES.iter().any(|f| raw == *f) {
        return Value::Null;
    }
    Value::Number(raw)
}

fn default_epoch() -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(JULD_EPOCH)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Parses `"days since 1950-01-01 00:00:00 UTC"` style units.
fn epoch_from_units(units: &str) -> Option<DateTime<Utc>> {
    let rest = units.trim().strip_prefix("days since")?.trim();
    let rest = rest.trim_end_matches("UTC").trim();
    parse_timestamp(rest)
}

fn days_after(epoch: DateTime<Utc>, days: f64) -> Option<DateTime<Utc>> {
    if !days.is_finite() || days.abs() > 1.0e7 {
        return None;
    }
    let millis = (days * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

/// Accepts Argo compact timestamps and common ISO-like layouts.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y%m%d%H%M%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y%m%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AttrValue, Dimension};

    fn profile_dataset() -> Dataset {
        let prof = || Dimension::new("N_PROF", 2);
        let levels = || Dimension::new("N_LEVELS", 3);
        let mut ds = Dataset::new();
        ds.insert(
            Variable::new(
                "PRES",
                vec![prof(), levels()],
                VarData::Float(vec![5.0, 10.0, f32::NAN, 4.0, 99999.0, 20.0]),
            )
            .with_attribute("_FillValue", AttrValue::Numbers(vec![99999.0])),
        )
        .unwrap();
        ds.insert(Variable::flags("DATA_MODE", vec![prof()], "R "))
            .unwrap();
        ds.insert(Variable::flags("PRES_QC", vec![prof(), levels()], "1 4238"))
            .unwrap();
        ds.insert(Variable::chars(
            "PI_NAME",
            vec![Dimension::new("STRING64", 12)],
            &["  Jane Doe"],
        ))
        .unwrap();
        ds.insert(
            Variable::new("JULD", vec![prof()], VarData::Double(vec![25567.5, 999999.0]))
                .with_attribute(
                    "units",
                    AttrValue::Text("days since 1950-01-01 00:00:00 UTC".into()),
                ),
        )
        .unwrap();
        ds.insert(Variable::chars(
            "LAUNCH_DATE",
            vec![Dimension::new("DATE_TIME", 14)],
            &["20190312103000"],
        ))
        .unwrap();
        ds.insert(Variable::new(
            "LAUNCH_LATITUDE",
            vec![],
            VarData::Double(vec![-12.5]),
        ))
        .unwrap();
        ds
    }

    #[test]
    fn absent_field_is_null() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get(&ds, "DOXY", &[0, 0]), Value::Null);
    }

    #[test]
    fn two_dimensional_index_selects_level() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get(&ds, "PRES", &[0, 1]), Value::Number(10.0));
        assert_eq!(Accessor::get(&ds, "PRES", &[1, 2]), Value::Number(20.0));
    }

    #[test]
    fn fill_and_nan_become_null() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get(&ds, "PRES", &[0, 2]), Value::Null);
        assert_eq!(Accessor::get(&ds, "PRES", &[1, 1]), Value::Null);
        assert_eq!(Accessor::get(&ds, "JULD", &[1]), Value::Null);
    }

    #[test]
    fn wrong_shape_is_null_not_error() {
        let ds = profile_dataset();
        // too few indices for a 2D field
        assert_eq!(Accessor::get(&ds, "PRES", &[0]), Value::Null);
        // too many indices
        assert_eq!(Accessor::get(&ds, "JULD", &[0, 0, 0]), Value::Null);
        // out of range
        assert_eq!(Accessor::get(&ds, "PRES", &[5, 0]), Value::Null);
        assert_eq!(Accessor::get(&ds, "DATA_MODE", &[9]), Value::Null);
    }

    #[test]
    fn scalar_ignores_index() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get(&ds, "LAUNCH_LATITUDE", &[]), Value::Number(-12.5));
        assert_eq!(Accessor::get(&ds, "LAUNCH_LATITUDE", &[3]), Value::Number(-12.5));
    }

    #[test]
    fn character_arrays_collapse_to_trimmed_text() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get(&ds, "PI_NAME", &[]), Value::Text("Jane Doe".into()));
        assert_eq!(Accessor::get(&ds, "DATA_MODE", &[0]), Value::Text("R".into()));
        assert_eq!(Accessor::get(&ds, "DATA_MODE", &[1]), Value::Null);
    }

    #[test]
    fn per_level_flags_read_one_character() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get(&ds, "PRES_QC", &[0, 0]), Value::Text("1".into()));
        assert_eq!(Accessor::get(&ds, "PRES_QC", &[0, 1]), Value::Null);
        assert_eq!(Accessor::get(&ds, "PRES_QC", &[1, 2]), Value::Text("8".into()));
        assert_eq!(Accessor::get(&ds, "PRES_QC", &[1]), Value::Null);
        assert_eq!(Accessor::texts(&ds, "DATA_MODE"), vec!["R"]);
    }

    #[test]
    fn corrupt_bytes_are_null() {
        let mut ds = Dataset::new();
        ds.insert(Variable::new(
            "PROJECT_NAME",
            vec![Dimension::new("STRING64", 4)],
            VarData::Char(vec![0xff, 0xfe, b'A', 0x80]),
        ))
        .unwrap();
        assert_eq!(Accessor::get(&ds, "PROJECT_NAME", &[]), Value::Null);
    }

    #[test]
    fn juld_days_decode_against_units_epoch() {
        let ds = profile_dataset();
        let t = Accessor::instant(&ds, "JULD", &[0]).unwrap();
        assert_eq!(t.to_rfc3339(), "2020-01-01T12:00:00+00:00");
    }

    #[test]
    fn compact_and_iso_timestamps_parse() {
        let ds = profile_dataset();
        let launch = Accessor::instant(&ds, "LAUNCH_DATE", &[]).unwrap();
        assert_eq!(launch.to_rfc3339(), "2019-03-12T10:30:00+00:00");
        assert!(parse_timestamp("2019-03-12T10:30:00Z").is_some());
        assert!(parse_timestamp("2019-03-12 10:30:00").is_some());
        assert!(parse_timestamp("2019-03-12").is_some());
    }

    #[test]
    fn malformed_instant_is_null() {
        let ds = profile_dataset();
        assert_eq!(Accessor::get_instant(&ds, "PI_NAME", &[]), Value::Null);
        assert_eq!(Accessor::get_instant(&ds, "MISSING", &[]), Value::Null);
        assert!(parse_timestamp("2019-13-45").is_none());
    }

    #[test]
    fn typed_helpers() {
        let ds = profile_dataset();
        assert_eq!(Accessor::number(&ds, "LAUNCH_LATITUDE", &[]), Some(-12.5));
        assert_eq!(Accessor::text(&ds, "DATA_MODE", &[0]).as_deref(), Some("R"));
        assert_eq!(Accessor::integer(&ds, "PRES", &[0, 0]), Some(5));
        assert_eq!(Accessor::integer(&ds, "LAUNCH_LATITUDE", &[]), None);
    }

    #[test]
    fn texts_lists_every_string() {
        let mut ds = profile_dataset();
        ds.insert(Variable::chars(
            "PARAMETER",
            vec![Dimension::new("N_PARAM", 3), Dimension::new("STRING16", 16)],
            &["PRES", "TEMP", ""],
        ))
        .unwrap();
        assert_eq!(Accessor::texts(&ds, "PARAMETER"), vec!["PRES", "TEMP"]);
        assert!(Accessor::texts(&ds, "PRES").is_empty());
        assert!(Accessor::texts(&ds, "NOPE").is_empty());
    }
}
