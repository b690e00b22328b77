//! NetCDF classic format (CDF-1 and CDF-2) codec.
//!
//! Argo GDAC metadata and profile files are published in the classic
//! format, which is a big-endian header followed by fixed and record
//! variable payloads. `decode` turns a complete file into a [`Dataset`];
//! `encode` writes non-record datasets back out and is what the test
//! fixtures are built with.

use crate::dataset::{AttrValue, Dataset, Dimension, VarData, Variable};
use crate::error::{IngestError, Result};
use std::collections::BTreeMap;

const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;
const STREAMING: u32 = 0xFFFF_FFFF;

const NC_BYTE: u32 = 1;
const NC_CHAR: u32 = 2;
const NC_SHORT: u32 = 3;
const NC_INT: u32 = 4;
const NC_FLOAT: u32 = 5;
const NC_DOUBLE: u32 = 6;

fn type_size(nc_type: u32) -> Result<usize> {
    match nc_type {
        NC_BYTE | NC_CHAR => Ok(1),
        NC_SHORT => Ok(2),
        NC_INT | NC_FLOAT => Ok(4),
        NC_DOUBLE => Ok(8),
        other => Err(IngestError::Format(format!("unsupported nc_type {other}"))),
    }
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                IngestError::Format(format!(
                    "unexpected end of header at byte {} (wanted {n} more)",
                    self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn count(&mut self) -> Result<usize> {
        Ok(self.u32()? as usize)
    }

    fn name(&mut self) -> Result<String> {
        let len = self.count()?;
        let raw = self.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|e| IngestError::Format(format!("non UTF-8 name: {e}")))?
            .to_string();
        self.take(padded(len) - len)?;
        Ok(name)
    }

    /// Reads a list tag; an ABSENT list is two zero words.
    fn list_header(&mut self, expected: u32) -> Result<usize> {
        let tag = self.u32()?;
        let count = self.count()?;
        if tag == 0 && count == 0 {
            return Ok(0);
        }
        if tag != expected {
            return Err(IngestError::Format(format!(
                "expected list tag {expected:#x}, found {tag:#x}"
            )));
        }
        Ok(count)
    }

    fn attributes(&mut self) -> Result<BTreeMap<String, AttrValue>> {
        let count = self.list_header(NC_ATTRIBUTE)?;
        let mut attrs = BTreeMap::new();
        for _ in 0..count {
            let name = self.name()?;
            let nc_type = self.u32()?;
            let nelems = self.count()?;
            let size = type_size(nc_type)?;
            let byte_len = nelems
                .checked_mul(size)
                .ok_or_else(|| IngestError::Format("attribute too large".into()))?;
            let raw = self.take(byte_len)?;
            self.take(padded(byte_len) - byte_len)?;
            let value = match decode_values(nc_type, raw)? {
                VarData::Char(bytes) => AttrValue::Text(
                    String::from_utf8_lossy(&bytes)
                        .trim_end_matches('\0')
                        .to_string(),
                ),
                other => AttrValue::Numbers(
                    (0..other.len()).filter_map(|i| other.number_at(i)).collect(),
                ),
            };
            attrs.insert(name, value);
        }
        Ok(attrs)
    }
}

fn decode_values(nc_type: u32, raw: &[u8]) -> Result<VarData> {
    Ok(match nc_type {
        NC_BYTE => VarData::Byte(raw.iter().map(|b| *b as i8).collect()),
        NC_CHAR => VarData::Char(raw.to_vec()),
        NC_SHORT => VarData::Short(
            raw.chunks_exact(2)
                .map(|c| i16::from_be_bytes([c[0], c[1]]))
                .collect(),
        ),
        NC_INT => VarData::Int(
            raw.chunks_exact(4)
                .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        NC_FLOAT => VarData::Float(
            raw.chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        NC_DOUBLE => VarData::Double(
            raw.chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    f64::from_be_bytes(b)
                })
                .collect(),
        ),
        other => return Err(IngestError::Format(format!("unsupported nc_type {other}"))),
    })
}

struct VarHeader {
    name: String,
    dim_ids: Vec<usize>,
    attributes: BTreeMap<String, AttrValue>,
    nc_type: u32,
    vsize: usize,
    begin: usize,
}

/// Decode a complete classic-format file.
pub fn decode(bytes: &[u8]) -> Result<Dataset> {
    let mut r = Reader::new(bytes);
    let magic = r.take(4)?;
    if &magic[..3] != b"CDF" {
        return Err(IngestError::Format("missing CDF magic".into()));
    }
    let version = magic[3];
    if version != 1 && version != 2 {
        return Err(IngestError::Format(format!(
            "unsupported CDF version {version}"
        )));
    }
    let raw_numrecs = r.u32()?;

    let dim_count = r.list_header(NC_DIMENSION)?;
    let mut dims = Vec::with_capacity(dim_count.min(256));
    let mut record_dim = None;
    for id in 0..dim_count {
        let name = r.name()?;
        let len = r.count()?;
        if len == 0 {
            record_dim = Some(id);
        }
        dims.push(Dimension::new(name, len));
    }

    let attributes = r.attributes()?;

    let var_count = r.list_header(NC_VARIABLE)?;
    let mut headers = Vec::with_capacity(var_count.min(1024));
    for _ in 0..var_count {
        let name = r.name()?;
        let ndims = r.count()?;
        let mut dim_ids = Vec::with_capacity(ndims.min(8));
        for _ in 0..ndims {
            let id = r.count()?;
            if id >= dims.len() {
                return Err(IngestError::Format(format!(
                    "variable {name} references unknown dimension {id}"
                )));
            }
            dim_ids.push(id);
        }
        let attributes = r.attributes()?;
        let nc_type = r.u32()?;
        let vsize = r.count()?;
        let begin = if version == 1 {
            r.u32()? as usize
        } else {
            r.u64()? as usize
        };
        headers.push(VarHeader {
            name,
            dim_ids,
            attributes,
            nc_type,
            vsize,
            begin,
        });
    }

    let is_record = |h: &VarHeader| record_dim.is_some() && h.dim_ids.first() == record_dim.as_ref();
    let record_vars: Vec<&VarHeader> = headers.iter().filter(|h| is_record(*h)).collect();
    let record_size = if record_vars.len() == 1 {
        // a lone record variable is stored without padding
        let h = record_vars[0];
        let lens: Vec<usize> = h.dim_ids[1..].iter().map(|id| dims[*id].len).collect();
        byte_len(&lens, type_size(h.nc_type)?, &h.name)?
    } else {
        record_vars.iter().map(|h| h.vsize).sum()
    };

    let numrecs = if raw_numrecs == STREAMING {
        match record_vars.iter().map(|h| h.begin).min() {
            Some(first) if record_size > 0 => bytes.len().saturating_sub(first) / record_size,
            _ => 0,
        }
    } else {
        raw_numrecs as usize
    };
    if let Some(id) = record_dim {
        dims[id].len = numrecs;
    }

    let mut dataset = Dataset {
        dimensions: dims.clone(),
        attributes,
        variables: BTreeMap::new(),
    };

    for header in &headers {
        let var_dims: Vec<Dimension> = header.dim_ids.iter().map(|id| dims[*id].clone()).collect();
        let elem = type_size(header.nc_type)?;
        let lens: Vec<usize> = var_dims.iter().map(|d| d.len).collect();
        let raw = if is_record(header) {
            let chunk = byte_len(&lens[1..], elem, &header.name)?;
            let mut out = Vec::new();
            for rec in 0..numrecs {
                let start = rec
                    .checked_mul(record_size)
                    .and_then(|off| off.checked_add(header.begin))
                    .ok_or_else(|| IngestError::Format(format!("record offset overflow in {}", header.name)))?;
                out.extend_from_slice(slice_at(bytes, start, chunk, &header.name)?);
            }
            out
        } else {
            let len = byte_len(&lens, elem, &header.name)?;
            slice_at(bytes, header.begin, len, &header.name)?.to_vec()
        };
        let mut variable = Variable::new(
            header.name.clone(),
            var_dims,
            decode_values(header.nc_type, &raw)?,
        );
        variable.attributes = header.attributes.clone();
        dataset.insert(variable)?;
    }

    Ok(dataset)
}

fn byte_len(lens: &[usize], elem: usize, name: &str) -> Result<usize> {
    lens.iter()
        .try_fold(elem, |acc, len| acc.checked_mul(*len))
        .ok_or_else(|| IngestError::Format(format!("variable {name} is too large")))
}

fn slice_at<'a>(bytes: &'a [u8], start: usize, len: usize, name: &str) -> Result<&'a [u8]> {
    start
        .checked_add(len)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| {
            IngestError::Format(format!(
                "data for {name} runs past end of file ({start}+{len} > {})",
                bytes.len()
            ))
        })
}

fn nc_type_of(data: &VarData) -> u32 {
    match data {
        VarData::Byte(_) => NC_BYTE,
        VarData::Char(_) => NC_CHAR,
        VarData::Short(_) => NC_SHORT,
        VarData::Int(_) => NC_INT,
        VarData::Float(_) => NC_FLOAT,
        VarData::Double(_) => NC_DOUBLE,
    }
}

fn encode_values(data: &VarData, out: &mut Vec<u8>) {
    match data {
        VarData::Byte(v) => out.extend(v.iter().map(|x| *x as u8)),
        VarData::Char(v) => out.extend_from_slice(v),
        VarData::Short(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        VarData::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        VarData::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        VarData::Double(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
    }
}

fn pad(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn put_u32(out: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = u32::try_from(value)
        .map_err(|_| IngestError::Format(format!("{value} does not fit a CDF-1 field")))?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn put_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    put_u32(out, name.len())?;
    out.extend_from_slice(name.as_bytes());
    pad(out);
    Ok(())
}

fn put_attributes(out: &mut Vec<u8>, attrs: &BTreeMap<String, AttrValue>) -> Result<()> {
    if attrs.is_empty() {
        out.extend_from_slice(&[0u8; 8]);
        return Ok(());
    }
    put_u32(out, NC_ATTRIBUTE as usize)?;
    put_u32(out, attrs.len())?;
    for (name, value) in attrs {
        put_name(out, name)?;
        match value {
            AttrValue::Text(text) => {
                put_u32(out, NC_CHAR as usize)?;
                put_u32(out, text.len())?;
                out.extend_from_slice(text.as_bytes());
            }
            AttrValue::Numbers(numbers) => {
                put_u32(out, NC_DOUBLE as usize)?;
                put_u32(out, numbers.len())?;
                numbers
                    .iter()
                    .for_each(|x| out.extend_from_slice(&x.to_be_bytes()));
            }
        }
        pad(out);
    }
    Ok(())
}

fn encode_header(dataset: &Dataset, begins: &[usize]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(b"CDF\x01");
    put_u32(&mut out, 0)?;

    if dataset.dimensions.is_empty() {
        out.extend_from_slice(&[0u8; 8]);
    } else {
        put_u32(&mut out, NC_DIMENSION as usize)?;
        put_u32(&mut out, dataset.dimensions.len())?;
        for dim in &dataset.dimensions {
            if dim.len == 0 {
                return Err(IngestError::Format(format!(
                    "dimension {} would be encoded as the record dimension",
                    dim.name
                )));
            }
            put_name(&mut out, &dim.name)?;
            put_u32(&mut out, dim.len)?;
        }
    }

    put_attributes(&mut out, &dataset.attributes)?;

    if dataset.variables.is_empty() {
        out.extend_from_slice(&[0u8; 8]);
        return Ok(out);
    }
    put_u32(&mut out, NC_VARIABLE as usize)?;
    put_u32(&mut out, dataset.variables.len())?;
    for (variable, begin) in dataset.variables.values().zip(begins) {
        put_name(&mut out, &variable.name)?;
        put_u32(&mut out, variable.dims.len())?;
        for dim in &variable.dims {
            let id = dataset
                .dimensions
                .iter()
                .position(|d| d.name == dim.name)
                .ok_or_else(|| {
                    IngestError::Format(format!("dimension {} is not declared", dim.name))
                })?;
            put_u32(&mut out, id)?;
        }
        put_attributes(&mut out, &variable.attributes)?;
        put_u32(&mut out, nc_type_of(&variable.data) as usize)?;
        put_u32(&mut out, variable_size(variable)?)?;
        put_u32(&mut out, *begin)?;
    }
    Ok(out)
}

fn variable_size(variable: &Variable) -> Result<usize> {
    Ok(padded(
        variable.element_count() * type_size(nc_type_of(&variable.data))?,
    ))
}

/// Encode a dataset as CDF-1. Record (unlimited) dimensions are not written.
pub fn encode(dataset: &Dataset) -> Result<Vec<u8>> {
    let placeholder = vec![0usize; dataset.variables.len()];
    let header_len = encode_header(dataset, &placeholder)?.len();

    let mut begins = Vec::with_capacity(dataset.variables.len());
    let mut offset = header_len;
    for variable in dataset.variables.values() {
        begins.push(offset);
        offset += variable_size(variable)?;
    }

    let mut out = encode_header(dataset, &begins)?;
    for variable in dataset.variables.values() {
        encode_values(&variable.data, &mut out);
        pad(&mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let mut ds = Dataset::new()
            .with_dimension("N_PROF", 2)
            .with_dimension("N_LEVELS", 3)
            .with_dimension("STRING8", 8);
        ds.attributes
            .insert("title".into(), AttrValue::Text("Argo float vertical profile".into()));
        ds.insert(
            Variable::new(
                "PRES",
                vec![Dimension::new("N_PROF", 2), Dimension::new("N_LEVELS", 3)],
                VarData::Float(vec![5.0, 10.0, 15.0, 4.0, 99999.0, 20.0]),
            )
            .with_attribute("_FillValue", AttrValue::Numbers(vec![99999.0])),
        )
        .unwrap();
        ds.insert(Variable::new(
            "CYCLE_NUMBER",
            vec![Dimension::new("N_PROF", 2)],
            VarData::Int(vec![1, 2]),
        ))
        .unwrap();
        ds.insert(Variable::chars(
            "PLATFORM_NUMBER",
            vec![Dimension::new("N_PROF", 2), Dimension::new("STRING8", 8)],
            &["1234567", "1234567"],
        ))
        .unwrap();
        ds.insert(Variable::new("JULD_LOCATION", vec![], VarData::Double(vec![25000.5])))
            .unwrap();
        ds
    }

    #[test]
    fn encoded_dataset_decodes_to_same_content() {
        let ds = sample();
        let bytes = encode(&ds).unwrap();
        assert_eq!(&bytes[..4], b"CDF\x01");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.variables, ds.variables);
        assert_eq!(decoded.dimension_len("N_LEVELS"), Some(3));
        assert_eq!(
            decoded.attributes.get("title").and_then(AttrValue::as_text),
            Some("Argo float vertical profile")
        );
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let bytes = encode(&sample()).unwrap();
        for cut in [3, 10, bytes.len() / 2, bytes.len() - 1] {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, IngestError::Format(_)), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn rejects_non_cdf_input() {
        assert!(matches!(
            decode(b"<html>404</html>").unwrap_err(),
            IngestError::Format(_)
        ));
    }

    #[test]
    fn reads_record_variables_across_records() {
        // Two record variables (int, short) over an unlimited dimension with 2 records.
        let mut out = Vec::new();
        out.extend_from_slice(b"CDF\x01");
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&NC_DIMENSION.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        put_name(&mut out, "N_HISTORY").unwrap();
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&NC_VARIABLE.to_be_bytes());
        out.extend_from_slice(&2u32.to_be_bytes());
        let header_len_without_begins = out.len() + 2 * (4 + 4 + 4 + 4 + 8 + 4 + 4 + 4);
        let first_begin = header_len_without_begins;
        for (name, nc_type, vsize, begin) in [
            ("A", NC_INT, 4u32, first_begin),
            ("B", NC_SHORT, 4u32, first_begin + 4),
        ] {
            put_name(&mut out, name).unwrap();
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&[0u8; 8]);
            out.extend_from_slice(&nc_type.to_be_bytes());
            out.extend_from_slice(&vsize.to_be_bytes());
            out.extend_from_slice(&(begin as u32).to_be_bytes());
        }
        assert_eq!(out.len(), first_begin);
        for rec in 0..2i32 {
            out.extend_from_slice(&(10 + rec).to_be_bytes());
            out.extend_from_slice(&((20 + rec) as i16).to_be_bytes());
            out.extend_from_slice(&[0, 0]);
        }

        let ds = decode(&out).unwrap();
        assert_eq!(ds.dimension_len("N_HISTORY"), Some(2));
        assert_eq!(ds.variable("A").unwrap().data, VarData::Int(vec![10, 11]));
        assert_eq!(ds.variable("B").unwrap().data, VarData::Short(vec![20, 21]));
    }
}
