use super::{entry_name, ArchiveTransport};
use crate::error::{IngestError, Result};
use crate::source::Mirror;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument};

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Key>([^<]+)</Key>").expect("Invalid regex pattern"));
static COMMON_PREFIX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<CommonPrefixes>\s*<Prefix>([^<]+)</Prefix>").expect("Invalid regex pattern")
});
static CONTINUATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<NextContinuationToken>([^<]+)</NextContinuationToken>")
        .expect("Invalid regex pattern")
});

/// Anonymous access to a public S3 bucket through its HTTPS endpoint.
/// Mirror addresses look like `s3://bucket/optional/prefix`.
pub struct S3Transport {
    client: reqwest::Client,
}

impl S3Transport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

/// Bucket endpoint and key prefix for an `s3://` address.
pub(crate) fn s3_location(mirror: &Mirror) -> Result<(String, String)> {
    let rest = mirror
        .base_address
        .strip_prefix("s3://")
        .ok_or_else(|| {
            IngestError::transport(&mirror.name, format!("not an s3 address: {}", mirror.base_address))
        })?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(IngestError::transport(&mirror.name, "s3 address has no bucket"));
    }
    Ok((
        format!("https://{bucket}.s3.amazonaws.com"),
        prefix.trim_matches('/').to_string(),
    ))
}

fn object_key(prefix: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}/{path}")
    }
}

/// Names under `query_prefix` in one ListObjectsV2 response page.
pub(crate) fn parse_list_page(body: &str, query_prefix: &str) -> Vec<String> {
    let keys = KEY_PATTERN.captures_iter(body);
    let prefixes = COMMON_PREFIX_PATTERN.captures_iter(body);
    keys.chain(prefixes)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|key| *key != query_prefix)
        .filter_map(|key| key.strip_prefix(query_prefix).and_then(entry_name))
        .collect()
}

#[async_trait]
impl ArchiveTransport for S3Transport {
    #[instrument(skip(self, mirror), fields(mirror = %mirror.name))]
    async fn list(&self, mirror: &Mirror, path: &str) -> Result<Vec<String>> {
        let (endpoint, prefix) = s3_location(mirror)?;
        let mut query_prefix = object_key(&prefix, path);
        if !query_prefix.ends_with('/') {
            query_prefix.push('/');
        }

        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut request = self.client.get(format!("{endpoint}/")).query(&[
                ("list-type", "2"),
                ("prefix", query_prefix.as_str()),
                ("delimiter", "/"),
            ]);
            if let Some(t) = &token {
                request = request.query(&[("continuation-token", t.as_str())]);
            }
            let body = request.send().await?.error_for_status()?.text().await?;
            names.extend(parse_list_page(&body, &query_prefix));
            token = CONTINUATION_PATTERN
                .captures(&body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            if token.is_none() {
                break;
            }
            debug!("Listing {} continues on another page", query_prefix);
        }
        Ok(names)
    }

    async fn exists(&self, mirror: &Mirror, path: &str) -> Result<bool> {
        let (endpoint, prefix) = s3_location(mirror)?;
        let url = format!("{endpoint}/{}", object_key(&prefix, path));
        let response = self.client.head(&url).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(false),
            s => Err(IngestError::transport(
                &mirror.name,
                format!("HEAD {url} returned {s}"),
            )),
        }
    }

    async fn fetch(&self, mirror: &Mirror, path: &str) -> Result<Vec<u8>> {
        let (endpoint, prefix) = s3_location(mirror)?;
        let url = format!("{endpoint}/{}", object_key(&prefix, path));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Protocol;

    fn mirror(base: &str) -> Mirror {
        Mirror::new("s3", base, Protocol::S3)
    }

    #[test]
    fn splits_bucket_and_prefix() {
        let (endpoint, prefix) = s3_location(&mirror("s3://argo-gdac-sandbox/pub")).unwrap();
        assert_eq!(endpoint, "https://argo-gdac-sandbox.s3.amazonaws.com");
        assert_eq!(prefix, "pub");
        assert_eq!(object_key(&prefix, "dac/aoml/1/1_meta.nc"), "pub/dac/aoml/1/1_meta.nc");
        assert!(s3_location(&mirror("https://not-s3")).is_err());
    }

    #[test]
    fn list_page_yields_children() {
        let body = r#"<ListBucketResult>
            <Prefix>pub/dac/aoml/1900001/</Prefix>
            <Contents><Key>pub/dac/aoml/1900001/1900001_meta.nc</Key></Contents>
            <Contents><Key>pub/dac/aoml/1900001/1900001_prof.nc</Key></Contents>
            <CommonPrefixes><Prefix>pub/dac/aoml/1900001/profiles/</Prefix></CommonPrefixes>
            </ListBucketResult>"#;
        let names = parse_list_page(body, "pub/dac/aoml/1900001/");
        assert_eq!(names, vec!["1900001_meta.nc", "1900001_prof.nc", "profiles"]);
    }
}
