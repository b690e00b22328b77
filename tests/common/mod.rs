#![allow(dead_code)]

use argo_ingest::constants::*;
use argo_ingest::dataset::{AttrValue, Dataset, Dimension, VarData, Variable};
use argo_ingest::netcdf;
use argo_ingest::pipeline::{Pipeline, PipelineContext, RegionFilter};
use argo_ingest::source::{Mirror, Protocol, SourceResolver};
use argo_ingest::storage::Store;
use argo_ingest::transport::InMemoryArchive;
use std::sync::Arc;

pub const CENTER: &str = "coriolis";
const FILL: f32 = 99999.0;

pub fn mirrors() -> Vec<Mirror> {
    vec![
        Mirror::new("primary", "https://primary.example/argo", Protocol::Http),
        Mirror::new("secondary", "ftp://secondary.example/argo", Protocol::Ftp),
        Mirror::new("tertiary", "s3://tertiary-bucket/pub", Protocol::S3),
    ]
}

pub fn metadata_bytes(identifier: &str, launch: Option<(f64, f64)>) -> Vec<u8> {
    let mut ds = Dataset::new();
    ds.insert(Variable::chars(
        PLATFORM_NUMBER,
        vec![Dimension::new("STRING8", 8)],
        &[identifier],
    ))
    .unwrap();
    ds.insert(Variable::chars(
        PLATFORM_TYPE,
        vec![Dimension::new("STRING32", 32)],
        &["ARVOR"],
    ))
    .unwrap();
    ds.insert(Variable::chars(
        LAUNCH_DATE,
        vec![Dimension::new("DATE_TIME", 14)],
        &["20210601120000"],
    ))
    .unwrap();
    if let Some((lat, lon)) = launch {
        ds.insert(Variable::new(LAUNCH_LATITUDE, vec![], VarData::Double(vec![lat])))
            .unwrap();
        ds.insert(Variable::new(LAUNCH_LONGITUDE, vec![], VarData::Double(vec![lon])))
            .unwrap();
    }
    ds.insert(Variable::chars(
        PARAMETER,
        vec![Dimension::new("N_PARAM", 3), Dimension::new("STRING16", 16)],
        &["PRES", "TEMP", "PSAL"],
    ))
    .unwrap();
    netcdf::encode(&ds).unwrap()
}

/// One QC byte per level: `flag` where a pressure exists, blank under fill.
fn qc_flags(pres: &[f32], flag: &str) -> String {
    pres.iter()
        .map(|p| if *p == FILL { " " } else { flag })
        .collect()
}

/// Combined-profile file in the GDAC layout: `levels[i]` holds cycle i's
/// pressures, `None` being a fill value, and shorter cycles are padded with
/// fill. The first cycle is real-time, later ones delayed-mode.
pub fn profile_bytes(cycle_numbers: &[i32], levels: &[&[Option<f32>]]) -> Vec<u8> {
    let n_prof = cycle_numbers.len();
    let n_levels = levels.iter().map(|l| l.len()).max().unwrap_or(0).max(1);
    let prof = || Dimension::new(N_PROF, n_prof);
    let lev = || Dimension::new(N_LEVELS, n_levels);

    let mut pres = Vec::with_capacity(n_prof * n_levels);
    let mut temp = Vec::with_capacity(n_prof * n_levels);
    let mut psal = Vec::with_capacity(n_prof * n_levels);
    for cycle in 0..n_prof {
        for level in 0..n_levels {
            let p = levels
                .get(cycle)
                .and_then(|l| l.get(level))
                .copied()
                .flatten();
            pres.push(p.unwrap_or(FILL));
            temp.push(p.map(|p| 28.0 - p / 100.0).unwrap_or(FILL));
            psal.push(p.map(|_| 35.2).unwrap_or(FILL));
        }
    }
    let fill = || AttrValue::Numbers(vec![FILL as f64]);

    let mut ds = Dataset::new();
    ds.insert(
        Variable::new(CYCLE_NUMBER, vec![prof()], VarData::Int(cycle_numbers.to_vec()))
            .with_attribute(FILL_VALUE_ATTR, AttrValue::Numbers(vec![99999.0])),
    )
    .unwrap();
    ds.insert(
        Variable::new(
            JULD,
            vec![prof()],
            VarData::Double((0..n_prof).map(|i| 26000.0 + 10.0 * i as f64).collect()),
        )
        .with_attribute(
            "units",
            AttrValue::Text("days since 1950-01-01 00:00:00 UTC".into()),
        ),
    )
    .unwrap();
    ds.insert(Variable::new(
        LATITUDE,
        vec![prof()],
        VarData::Double(vec![-12.0; n_prof]),
    ))
    .unwrap();
    ds.insert(Variable::new(
        LONGITUDE,
        vec![prof()],
        VarData::Double(vec![75.0; n_prof]),
    ))
    .unwrap();
    let modes: String = (0..n_prof).map(|i| if i == 0 { 'R' } else { 'D' }).collect();
    ds.insert(Variable::flags(DATA_MODE, vec![prof()], &modes))
        .unwrap();
    ds.insert(Variable::flags(DIRECTION, vec![prof()], &"A".repeat(n_prof)))
        .unwrap();
    for (qc_field, flag) in [("PRES_QC", "1"), ("TEMP_QC", "1"), ("PSAL_QC", "2")] {
        ds.insert(Variable::flags(
            qc_field,
            vec![prof(), lev()],
            &qc_flags(&pres, flag),
        ))
        .unwrap();
    }
    ds.insert(
        Variable::new(PRES, vec![prof(), lev()], VarData::Float(pres))
            .with_attribute(FILL_VALUE_ATTR, fill()),
    )
    .unwrap();
    ds.insert(
        Variable::new(TEMP, vec![prof(), lev()], VarData::Float(temp))
            .with_attribute(FILL_VALUE_ATTR, fill()),
    )
    .unwrap();
    ds.insert(
        Variable::new(PSAL, vec![prof(), lev()], VarData::Float(psal))
            .with_attribute(FILL_VALUE_ATTR, fill()),
    )
    .unwrap();
    netcdf::encode(&ds).unwrap()
}

/// Publish a platform's two datasets on `mirror`.
pub fn publish(archive: &InMemoryArchive, mirror: &str, identifier: &str, meta: Vec<u8>, prof: Vec<u8>) {
    let dir = format!("dac/{CENTER}/{identifier}");
    archive.put(mirror, &format!("{dir}/{identifier}_meta.nc"), meta);
    archive.put(mirror, &format!("{dir}/{identifier}_prof.nc"), prof);
}

/// The reference platform: cycle 1 has five good levels and one without
/// pressure, cycle 2 has three good levels.
pub fn publish_reference_platform(archive: &InMemoryArchive, mirror: &str) {
    let cycle_one: [Option<f32>; 6] =
        [Some(5.0), Some(10.0), None, Some(20.0), Some(50.0), Some(100.0)];
    let cycle_two: [Option<f32>; 3] = [Some(4.0), Some(9.0), Some(30.0)];
    publish(
        archive,
        mirror,
        "1234567",
        metadata_bytes("1234567", Some((-12.5, 74.0))),
        profile_bytes(&[1, 2], &[&cycle_one[..], &cycle_two[..]]),
    );
}

pub fn pipeline(
    archive: &InMemoryArchive,
    store: Arc<dyn Store>,
    batch_size: usize,
    region: Option<RegionFilter>,
) -> Pipeline {
    let resolver = SourceResolver::new(
        Arc::new(archive.clone()),
        mirrors(),
        4,
        &SourceResolver::default_centers(),
    );
    Pipeline::new(PipelineContext {
        resolver,
        store,
        batch_size,
        region,
    })
}
