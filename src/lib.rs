pub mod accessor;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod netcdf;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod transport;
pub mod validation;
