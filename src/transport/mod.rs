//! Protocol transports for reaching archive mirrors.
//!
//! Paths handed to a transport are relative to the mirror's base address,
//! e.g. `dac/coriolis/6903569/` or `dac/coriolis/6903569/6903569_meta.nc`.
//! A listing of a directory that does not exist is an empty `Vec`, not an
//! error; errors are reserved for the mirror being unusable.

mod ftp;
mod http;
mod memory;
mod s3;

pub use ftp::FtpTransport;
pub use http::HttpTransport;
pub use memory::InMemoryArchive;
pub use s3::S3Transport;

use crate::error::Result;
use crate::source::{Mirror, Protocol};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// Entry names directly under the directory `path`.
    async fn list(&self, mirror: &Mirror, path: &str) -> Result<Vec<String>>;

    /// Whether a file exists at `path`, without downloading it.
    async fn exists(&self, mirror: &Mirror, path: &str) -> Result<bool>;

    /// Full contents of the file at `path`.
    async fn fetch(&self, mirror: &Mirror, path: &str) -> Result<Vec<u8>>;
}

/// Dispatches each call to the transport matching the mirror's protocol.
pub struct RemoteTransport {
    http: HttpTransport,
    s3: S3Transport,
    ftp: FtpTransport,
}

impl RemoteTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpTransport::new(timeout)?,
            s3: S3Transport::new(timeout)?,
            ftp: FtpTransport::new(timeout),
        })
    }

    fn for_protocol(&self, protocol: Protocol) -> &dyn ArchiveTransport {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::S3 => &self.s3,
            Protocol::Ftp => &self.ftp,
        }
    }
}

#[async_trait]
impl ArchiveTransport for RemoteTransport {
    async fn list(&self, mirror: &Mirror, path: &str) -> Result<Vec<String>> {
        self.for_protocol(mirror.protocol).list(mirror, path).await
    }

    async fn exists(&self, mirror: &Mirror, path: &str) -> Result<bool> {
        self.for_protocol(mirror.protocol).exists(mirror, path).await
    }

    async fn fetch(&self, mirror: &Mirror, path: &str) -> Result<Vec<u8>> {
        self.for_protocol(mirror.protocol).fetch(mirror, path).await
    }
}

/// Joins a base address and a relative path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Last path segment of a listing entry, without a trailing slash.
pub(crate) fn entry_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
