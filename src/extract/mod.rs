//! Record extraction from opened platform datasets.

pub mod metadata;
pub mod profile;

pub use metadata::{extract_metadata, platform_from_dataset};
pub use profile::{cycles_from_dataset, extract_cycles, ProfileRecords, SkippedCycle};

/// Extracted records together with the checksum of the dataset they came
/// from.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub records: T,
    pub checksum: String,
}
