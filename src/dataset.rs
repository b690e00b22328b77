//! In-memory representation of a multidimensional scientific dataset.
//!
//! A `Dataset` is what every archive transport ultimately yields: named
//! dimensions, named variables laid out row-major over those dimensions,
//! and attributes. Character variables usually carry their string length
//! as the innermost dimension, the way NetCDF classic files store them, but
//! single-character flags such as `DATA_MODE(N_PROF)` or
//! `TEMP_QC(N_PROF, N_LEVELS)` have no such dimension and index per byte.

use crate::constants::FILL_VALUE_ATTR;
use crate::error::{IngestError, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum VarData {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl VarData {
    pub fn len(&self) -> usize {
        match self {
            VarData::Byte(v) => v.len(),
            VarData::Char(v) => v.len(),
            VarData::Short(v) => v.len(),
            VarData::Int(v) => v.len(),
            VarData::Float(v) => v.len(),
            VarData::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric element at a flat offset. `None` for char data or out of range.
    pub fn number_at(&self, offset: usize) -> Option<f64> {
        match self {
            VarData::Byte(v) => v.get(offset).map(|x| *x as f64),
            VarData::Char(_) => None,
            VarData::Short(v) => v.get(offset).map(|x| *x as f64),
            VarData::Int(v) => v.get(offset).map(|x| *x as f64),
            VarData::Float(v) => v.get(offset).map(|x| *x as f64),
            VarData::Double(v) => v.get(offset).copied(),
        }
    }

    /// Default NetCDF fill value for the element type, used when a variable
    /// declares none.
    pub fn default_fill(&self) -> Option<f64> {
        match self {
            VarData::Byte(_) => Some(-127.0),
            VarData::Char(_) => None,
            VarData::Short(_) => Some(-32767.0),
            VarData::Int(_) => Some(-2147483647.0),
            VarData::Float(_) => Some((9.969_209_968_386_869e36_f64 as f32) as f64),
            VarData::Double(_) => Some(9.969_209_968_386_869e36),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            AttrValue::Numbers(_) => None,
        }
    }

    pub fn first_number(&self) -> Option<f64> {
        match self {
            AttrValue::Numbers(v) => v.first().copied(),
            AttrValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

impl Dimension {
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            len,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dims: Vec<Dimension>,
    pub attributes: BTreeMap<String, AttrValue>,
    pub data: VarData,
}

impl Variable {
    pub fn new(name: impl Into<String>, dims: Vec<Dimension>, data: VarData) -> Self {
        Self {
            name: name.into(),
            dims,
            attributes: BTreeMap::new(),
            data,
        }
    }

    /// Build a fixed-width character variable. The last dimension is the
    /// string length; shorter strings are space padded like Argo files are.
    pub fn chars(name: impl Into<String>, dims: Vec<Dimension>, values: &[&str]) -> Self {
        let width = dims.last().map(|d| d.len).unwrap_or(0);
        let mut bytes = Vec::with_capacity(values.len() * width);
        for value in values {
            let mut raw: Vec<u8> = value.bytes().take(width).collect();
            raw.resize(width, b' ');
            bytes.extend(raw);
        }
        Self::new(name, dims, VarData::Char(bytes))
    }

    /// Build a character variable with one byte per element and no string
    /// dimension, the layout Argo uses for QC and mode flags.
    pub fn flags(name: impl Into<String>, dims: Vec<Dimension>, flags: &str) -> Self {
        Self::new(name, dims, VarData::Char(flags.as_bytes().to_vec()))
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.len).collect()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().map(|d| d.len).product()
    }

    pub fn is_char(&self) -> bool {
        matches!(self.data, VarData::Char(_))
    }

    pub fn fill_value(&self) -> Option<f64> {
        self.attributes
            .get(FILL_VALUE_ATTR)
            .and_then(AttrValue::first_number)
            .or_else(|| self.data.default_fill())
    }

    pub fn text_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(AttrValue::as_text)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub dimensions: Vec<Dimension>,
    pub attributes: BTreeMap<String, AttrValue>,
    pub variables: BTreeMap<String, Variable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.len)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn with_dimension(mut self, name: impl Into<String>, len: usize) -> Self {
        let name = name.into();
        if let Some(existing) = self.dimensions.iter_mut().find(|d| d.name == name) {
            existing.len = len;
        } else {
            self.dimensions.push(Dimension::new(name, len));
        }
        self
    }

    /// Insert a variable, checking its payload matches its declared shape.
    pub fn insert(&mut self, variable: Variable) -> Result<()> {
        let expected = variable.element_count();
        if variable.data.len() != expected {
            return Err(IngestError::Format(format!(
                "variable {} declares {} elements but carries {}",
                variable.name,
                expected,
                variable.data.len()
            )));
        }
        for dim in &variable.dims {
            if self.dimension_len(&dim.name).is_none() {
                self.dimensions.push(dim.clone());
            }
        }
        self.variables.insert(variable.name.clone(), variable);
        Ok(())
    }

    /// Whether `variable`'s innermost dimension is a string length rather
    /// than an axis. It is when named like one (`STRING*`, `DATE_TIME`) or
    /// when no numeric variable shares it.
    pub fn has_string_dimension(&self, variable: &Variable) -> bool {
        if !variable.is_char() {
            return false;
        }
        let Some(last) = variable.dims.last() else {
            return false;
        };
        if last.name.starts_with("STRING") || last.name == "DATE_TIME" {
            return true;
        }
        !self
            .variables
            .values()
            .filter(|other| !other.is_char())
            .any(|other| other.dims.iter().any(|d| d.name == last.name))
    }

    /// Dimensions a reader indexes into; string-length dimensions are hidden.
    pub fn logical_shape(&self, variable: &Variable) -> Vec<usize> {
        let shape = variable.shape();
        if self.has_string_dimension(variable) {
            shape[..shape.len() - 1].to_vec()
        } else {
            shape
        }
    }

    /// Bytes per logical element of a character variable. A dimensionless
    /// one is a single string.
    pub fn string_width(&self, variable: &Variable) -> usize {
        if variable.dims.is_empty() {
            variable.data.len()
        } else if self.has_string_dimension(variable) {
            variable.dims.last().map(|d| d.len).unwrap_or(1)
        } else {
            1
        }
    }
}
