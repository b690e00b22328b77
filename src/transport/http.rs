use super::{entry_name, join_url, ArchiveTransport};
use crate::error::{IngestError, Result};
use crate::source::Mirror;
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument};

/// HTTP(S) mirror access. Directory listings are the server's HTML index
/// pages; entries are read from their anchors.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("argo-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveTransport for HttpTransport {
    #[instrument(skip(self, mirror), fields(mirror = %mirror.name))]
    async fn list(&self, mirror: &Mirror, path: &str) -> Result<Vec<String>> {
        let mut url = join_url(&mirror.base_address, path);
        if !url.ends_with('/') {
            url.push('/');
        }
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No listing at {}", url);
            return Ok(Vec::new());
        }
        let response = response.error_for_status()?;
        let body = response.text().await?;
        parse_index_page(&body)
    }

    async fn exists(&self, mirror: &Mirror, path: &str) -> Result<bool> {
        let url = join_url(&mirror.base_address, path);
        let response = self.client.head(&url).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(IngestError::transport(
                &mirror.name,
                format!("HEAD {url} returned {s}"),
            )),
        }
    }

    async fn fetch(&self, mirror: &Mirror, path: &str) -> Result<Vec<u8>> {
        let url = join_url(&mirror.base_address, path);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

/// Extracts entry names from an autoindex-style HTML page, skipping sort
/// links, parent links and anything pointing off the directory.
pub(crate) fn parse_index_page(body: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(body);
    let anchors = Selector::parse("a[href]")
        .map_err(|e| IngestError::Format(format!("invalid listing selector: {e:?}")))?;
    let mut names = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.starts_with('?') || href.starts_with('/') || href.contains("://") {
            continue;
        }
        if let Some(name) = entry_name(href) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apache_index() {
        let body = r#"
            <html><body><h1>Index of /dac/coriolis/6903569</h1>
            <a href="?C=N;O=D">Name</a>
            <a href="/dac/coriolis/">Parent Directory</a>
            <a href="6903569_meta.nc">6903569_meta.nc</a>
            <a href="6903569_prof.nc">6903569_prof.nc</a>
            <a href="profiles/">profiles/</a>
            <a href="https://elsewhere.example/">elsewhere</a>
            </body></html>"#;
        let names = parse_index_page(body).unwrap();
        assert_eq!(names, vec!["6903569_meta.nc", "6903569_prof.nc", "profiles"]);
    }

    #[test]
    fn empty_page_has_no_entries() {
        assert!(parse_index_page("<html></html>").unwrap().is_empty());
    }
}
