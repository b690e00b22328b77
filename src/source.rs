//! Mirror resolution for a platform.
//!
//! A [`SourceResolver`] walks the configured mirrors in priority order and,
//! on each, asks its two access strategies to locate the platform: the
//! primary [`CatalogueAccess`] reads directory listings, the fallback
//! [`DirectAccess`] probes the metadata file by path. The first mirror where
//! either succeeds becomes the [`ConnectedSource`], which keeps the winning
//! strategy for every dataset it opens afterwards.

use crate::constants::{
    self, ARCHIVE_CENTERS, AWS_S3, DAC_DIR, GODAE_HTTPS, IFREMER_FTP, IFREMER_HTTPS,
};
use crate::dataset::Dataset;
use crate::error::{IngestError, Result};
use crate::netcdf;
use crate::transport::ArchiveTransport;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Ftp,
    S3,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Http => "http",
            Protocol::Ftp => "ftp",
            Protocol::S3 => "s3",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub base_address: String,
    pub protocol: Protocol,
}

impl Mirror {
    pub fn new(name: impl Into<String>, base_address: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            base_address: base_address.into(),
            protocol,
        }
    }

    /// The public GDAC mirrors in priority order.
    pub fn defaults() -> Vec<Mirror> {
        vec![
            Mirror::new(IFREMER_HTTPS.0, IFREMER_HTTPS.1, Protocol::Http),
            Mirror::new(IFREMER_FTP.0, IFREMER_FTP.1, Protocol::Ftp),
            Mirror::new(GODAE_HTTPS.0, GODAE_HTTPS.1, Protocol::Http),
            Mirror::new(AWS_S3.0, AWS_S3.1, Protocol::S3),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Metadata,
    Profile,
}

impl DatasetKind {
    pub fn file_name(self, identifier: &str) -> String {
        let suffix = match self {
            DatasetKind::Metadata => constants::META_SUFFIX,
            DatasetKind::Profile => constants::PROF_SUFFIX,
        };
        format!("{identifier}{suffix}")
    }
}

/// Where a platform lives on a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLocation {
    pub archive_center: String,
    pub directory: String,
    /// Directory entries, when the locating strategy read a listing.
    pub catalogue: Option<Vec<String>>,
}

impl PlatformLocation {
    pub fn new(archive_center: &str, identifier: &str) -> Self {
        Self {
            archive_center: archive_center.to_string(),
            directory: format!("{DAC_DIR}/{archive_center}/{identifier}"),
            catalogue: None,
        }
    }

    pub fn dataset_path(&self, kind: DatasetKind, identifier: &str) -> String {
        format!("{}/{}", self.directory, kind.file_name(identifier))
    }
}

/// A way of finding and reading a platform's datasets on one mirror.
#[async_trait]
pub trait DatasetAccess: Send + Sync {
    fn name(&self) -> &'static str;

    async fn locate(
        &self,
        transport: &dyn ArchiveTransport,
        mirror: &Mirror,
        identifier: &str,
    ) -> Result<Option<PlatformLocation>>;

    async fn fetch(
        &self,
        transport: &dyn ArchiveTransport,
        mirror: &Mirror,
        location: &PlatformLocation,
        kind: DatasetKind,
        identifier: &str,
    ) -> Result<Vec<u8>>;
}

/// Primary strategy: list each centre's platform directory and require the
/// metadata dataset to be catalogued there.
pub struct CatalogueAccess {
    centers: Vec<String>,
}

impl CatalogueAccess {
    pub fn new(centers: Vec<String>) -> Self {
        Self { centers }
    }
}

#[async_trait]
impl DatasetAccess for CatalogueAccess {
    fn name(&self) -> &'static str {
        "catalogue"
    }

    async fn locate(
        &self,
        transport: &dyn ArchiveTransport,
        mirror: &Mirror,
        identifier: &str,
    ) -> Result<Option<PlatformLocation>> {
        let meta = DatasetKind::Metadata.file_name(identifier);
        for center in &self.centers {
            let mut location = PlatformLocation::new(center, identifier);
            let entries = transport.list(mirror, &location.directory).await?;
            if entries.iter().any(|e| *e == meta) {
                debug!("{} catalogued under {} on {}", identifier, center, mirror.name);
                location.catalogue = Some(entries);
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    async fn fetch(
        &self,
        transport: &dyn ArchiveTransport,
        mirror: &Mirror,
        location: &PlatformLocation,
        kind: DatasetKind,
        identifier: &str,
    ) -> Result<Vec<u8>> {
        let file = kind.file_name(identifier);
        let listed = location
            .catalogue
            .as_ref()
            .map(|entries| entries.contains(&file))
            .unwrap_or(false);
        if !listed {
            return Err(IngestError::transport(
                &mirror.name,
                format!("{file} is not in the catalogue of {}", location.directory),
            ));
        }
        transport
            .fetch(mirror, &location.dataset_path(kind, identifier))
            .await
    }
}

/// Fallback strategy: probe the metadata file path on each centre without
/// relying on listings.
pub struct DirectAccess {
    centers: Vec<String>,
}

impl DirectAccess {
    pub fn new(centers: Vec<String>) -> Self {
        Self { centers }
    }
}

#[async_trait]
impl DatasetAccess for DirectAccess {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn locate(
        &self,
        transport: &dyn ArchiveTransport,
        mirror: &Mirror,
        identifier: &str,
    ) -> Result<Option<PlatformLocation>> {
        for center in &self.centers {
            let location = PlatformLocation::new(center, identifier);
            let path = location.dataset_path(DatasetKind::Metadata, identifier);
            if transport.exists(mirror, &path).await? {
                debug!("{} found by probe under {} on {}", identifier, center, mirror.name);
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    async fn fetch(
        &self,
        transport: &dyn ArchiveTransport,
        mirror: &Mirror,
        location: &PlatformLocation,
        kind: DatasetKind,
        identifier: &str,
    ) -> Result<Vec<u8>> {
        transport
            .fetch(mirror, &location.dataset_path(kind, identifier))
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Connected { strategy: String },
    Failed { reason: String },
}

/// One entry per mirror tried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub mirror: String,
    pub protocol: Protocol,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }
}

/// Result of resolving one platform, with the full attempt log.
pub struct Resolution {
    pub attempts: Vec<AttemptRecord>,
    pub source: Result<ConnectedSource>,
}

impl Resolution {
    pub fn failures(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_failure()).count()
    }
}

pub struct SourceResolver {
    transport: Arc<dyn ArchiveTransport>,
    mirrors: Vec<Mirror>,
    max_attempts: usize,
    primary: Arc<dyn DatasetAccess>,
    fallback: Arc<dyn DatasetAccess>,
}

impl SourceResolver {
    pub fn new(
        transport: Arc<dyn ArchiveTransport>,
        mirrors: Vec<Mirror>,
        max_attempts: usize,
        centers: &[String],
    ) -> Self {
        Self::with_strategies(
            transport,
            mirrors,
            max_attempts,
            Arc::new(CatalogueAccess::new(centers.to_vec())),
            Arc::new(DirectAccess::new(centers.to_vec())),
        )
    }

    pub fn with_strategies(
        transport: Arc<dyn ArchiveTransport>,
        mirrors: Vec<Mirror>,
        max_attempts: usize,
        primary: Arc<dyn DatasetAccess>,
        fallback: Arc<dyn DatasetAccess>,
    ) -> Self {
        Self {
            transport,
            mirrors,
            max_attempts,
            primary,
            fallback,
        }
    }

    pub fn default_centers() -> Vec<String> {
        ARCHIVE_CENTERS.iter().map(|c| c.to_string()).collect()
    }

    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    /// Try mirrors in order until one locates `identifier`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, identifier: &str) -> Resolution {
        let mut attempts = Vec::new();
        for mirror in self.mirrors.iter().take(self.max_attempts) {
            match self.try_mirror(mirror, identifier).await {
                Ok((strategy, location)) => {
                    info!(
                        mirror = %mirror.name,
                        protocol = %mirror.protocol,
                        outcome = "connected",
                        strategy = strategy.name(),
                        "Resolved {} under {}", identifier, location.archive_center
                    );
                    counter!("argo_mirror_attempts_total", "outcome" => "connected").increment(1);
                    attempts.push(AttemptRecord {
                        mirror: mirror.name.clone(),
                        protocol: mirror.protocol,
                        outcome: AttemptOutcome::Connected {
                            strategy: strategy.name().to_string(),
                        },
                    });
                    let source = ConnectedSource {
                        transport: Arc::clone(&self.transport),
                        mirror: mirror.clone(),
                        strategy,
                        location,
                        identifier: identifier.to_string(),
                    };
                    return Resolution {
                        attempts,
                        source: Ok(source),
                    };
                }
                Err(reason) => {
                    warn!(
                        mirror = %mirror.name,
                        protocol = %mirror.protocol,
                        outcome = "failed",
                        "Mirror attempt for {} failed: {}", identifier, reason
                    );
                    counter!("argo_mirror_attempts_total", "outcome" => "failed").increment(1);
                    attempts.push(AttemptRecord {
                        mirror: mirror.name.clone(),
                        protocol: mirror.protocol,
                        outcome: AttemptOutcome::Failed { reason },
                    });
                }
            }
        }
        let tried = attempts.len();
        Resolution {
            attempts,
            source: Err(IngestError::SourceUnreachable {
                identifier: identifier.to_string(),
                attempts: tried,
            }),
        }
    }

    async fn try_mirror(
        &self,
        mirror: &Mirror,
        identifier: &str,
    ) -> std::result::Result<(Arc<dyn DatasetAccess>, PlatformLocation), String> {
        let mut reasons = Vec::with_capacity(2);
        for strategy in [&self.primary, &self.fallback] {
            match strategy
                .locate(self.transport.as_ref(), mirror, identifier)
                .await
            {
                Ok(Some(location)) => return Ok((Arc::clone(strategy), location)),
                Ok(None) => reasons.push(format!("{}: not found", strategy.name())),
                Err(e) => reasons.push(format!("{}: {}", strategy.name(), e)),
            }
        }
        Err(reasons.join("; "))
    }
}

/// A platform located on a mirror, bound to the strategy that found it.
pub struct ConnectedSource {
    transport: Arc<dyn ArchiveTransport>,
    pub mirror: Mirror,
    strategy: Arc<dyn DatasetAccess>,
    pub location: PlatformLocation,
    pub identifier: String,
}

impl fmt::Debug for ConnectedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedSource")
            .field("mirror", &self.mirror.name)
            .field("strategy", &self.strategy.name())
            .field("location", &self.location)
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl ConnectedSource {
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Download and decode one of the platform's datasets. The raw bytes are
    /// cached in a temporary file owned by the returned handle and removed
    /// when it is dropped.
    #[instrument(skip(self), fields(identifier = %self.identifier, mirror = %self.mirror.name))]
    pub async fn open(&self, kind: DatasetKind) -> Result<OpenedDataset> {
        let bytes = self
            .strategy
            .fetch(
                self.transport.as_ref(),
                &self.mirror,
                &self.location,
                kind,
                &self.identifier,
            )
            .await?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        let mut cache = NamedTempFile::new()?;
        cache.write_all(&bytes)?;
        cache.flush()?;
        let dataset = netcdf::decode(&bytes)?;
        debug!(
            "Opened {:?} dataset ({} bytes, {} variables)",
            kind,
            bytes.len(),
            dataset.variables.len()
        );
        Ok(OpenedDataset {
            kind,
            dataset,
            checksum,
            cache,
        })
    }
}

/// A decoded dataset plus its scoped on-disk copy.
pub struct OpenedDataset {
    pub kind: DatasetKind,
    pub dataset: Dataset,
    pub checksum: String,
    cache: NamedTempFile,
}

impl OpenedDataset {
    pub fn cache_path(&self) -> &Path {
        self.cache.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryArchive;

    fn meta_bytes() -> Vec<u8> {
        let ds = Dataset::new();
        netcdf::encode(&ds).unwrap()
    }

    fn mirrors() -> Vec<Mirror> {
        vec![
            Mirror::new("primary", "https://primary.example", Protocol::Http),
            Mirror::new("secondary", "ftp://secondary.example/argo", Protocol::Ftp),
            Mirror::new("bucket", "s3://bucket/pub", Protocol::S3),
        ]
    }

    fn resolver(archive: &InMemoryArchive, max_attempts: usize) -> SourceResolver {
        SourceResolver::new(
            Arc::new(archive.clone()),
            mirrors(),
            max_attempts,
            &SourceResolver::default_centers(),
        )
    }

    #[tokio::test]
    async fn skips_failing_mirrors_in_order() {
        let archive = InMemoryArchive::new();
        archive.make_unreachable("primary");
        archive.make_unreachable("secondary");
        archive.put("bucket", "dac/meds/4901234/4901234_meta.nc", meta_bytes());

        let resolution = resolver(&archive, 4).resolve("4901234").await;
        assert_eq!(resolution.failures(), 2);
        let source = resolution.source.unwrap();
        assert_eq!(source.mirror.name, "bucket");
        assert_eq!(source.location.archive_center, "meds");
        assert_eq!(source.strategy_name(), "catalogue");
    }

    #[tokio::test]
    async fn falls_back_to_direct_probe_when_listing_is_disabled() {
        let archive = InMemoryArchive::new();
        archive.disable_listing("primary");
        archive.put("primary", "dac/aoml/1900001/1900001_meta.nc", meta_bytes());

        let resolution = resolver(&archive, 4).resolve("1900001").await;
        assert_eq!(resolution.failures(), 0);
        let source = resolution.source.unwrap();
        assert_eq!(source.mirror.name, "primary");
        assert_eq!(source.strategy_name(), "direct");
        assert!(source.open(DatasetKind::Metadata).await.is_ok());
    }

    #[tokio::test]
    async fn exhausting_attempts_is_unreachable() {
        let archive = InMemoryArchive::new();
        archive.put("bucket", "dac/meds/4901234/4901234_meta.nc", meta_bytes());

        let resolution = resolver(&archive, 2).resolve("4901234").await;
        assert_eq!(resolution.attempts.len(), 2);
        assert!(matches!(
            resolution.source,
            Err(IngestError::SourceUnreachable { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let archive = InMemoryArchive::new();
        archive.make_unreachable("primary");
        archive.put("secondary", "dac/csiro/5900001/5900001_meta.nc", meta_bytes());
        archive.put("bucket", "dac/csiro/5900001/5900001_meta.nc", meta_bytes());

        let r = resolver(&archive, 4);
        for _ in 0..3 {
            let resolution = r.resolve("5900001").await;
            assert_eq!(resolution.attempts.len(), 2);
            assert_eq!(resolution.source.unwrap().mirror.name, "secondary");
        }
    }

    #[tokio::test]
    async fn opened_dataset_cache_is_released_on_drop() {
        let archive = InMemoryArchive::new();
        archive.put("primary", "dac/aoml/1900001/1900001_meta.nc", meta_bytes());
        let source = resolver(&archive, 1).resolve("1900001").await.source.unwrap();

        let opened = source.open(DatasetKind::Metadata).await.unwrap();
        let path = opened.cache_path().to_path_buf();
        assert!(path.exists());
        assert_eq!(opened.checksum.len(), 64);
        drop(opened);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn catalogue_strategy_refuses_uncatalogued_dataset() {
        let archive = InMemoryArchive::new();
        archive.put("primary", "dac/aoml/1900001/1900001_meta.nc", meta_bytes());
        let source = resolver(&archive, 1).resolve("1900001").await.source.unwrap();
        assert!(source.open(DatasetKind::Profile).await.is_err());
    }
}
