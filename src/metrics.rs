//! Prometheus exposition of ingest counters.
//!
//! Counters recorded across the crate:
//! - `argo_platforms_processed_total{outcome}`
//! - `argo_mirror_attempts_total{outcome}`
//! - `argo_cycles_skipped_total`
//! - `argo_measurement_rows_written_total`
//! - `argo_batch_failures_total`
//! - `argo_platform_duration_seconds` (histogram)
//!
//! Without an installed recorder these calls are no-ops.

use crate::error::{IngestError, Result};
use std::net::SocketAddr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

/// Install the Prometheus exporter on `listen_address`. Only the first call
/// has an effect.
pub fn init_metrics(listen_address: &str) -> Result<()> {
    let addr: SocketAddr = listen_address.parse().map_err(|e| {
        IngestError::Config(format!("invalid metrics address '{listen_address}': {e}"))
    })?;
    INIT.call_once(|| {
        let builder =
            metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        match builder.install() {
            Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
            Err(e) => warn!("Prometheus exporter install failed: {}", e),
        }
    });
    Ok(())
}
