//! Background consumer that re-fetches stale request paths.
//!
//! Jobs come off the redis stream; each one is a GET against this service
//! with the cache bypassed, which recomputes and repopulates the entry
//! through the normal handler path. Fetches run under a concurrency cap
//! and a hard wall-clock timeout so a stuck recomputation cannot pile up.

use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use maps_common::{MapsError, MapsResult};

use crate::state::AppState;

/// Worker configuration, sourced from the environment.
#[derive(Debug, Clone)]
pub struct RefreshWorkerConfig {
    pub enabled: bool,
    pub concurrency: usize,
    pub hard_timeout: Duration,
    /// Base URL this service is reachable at for self-fetches.
    pub base_url: String,
}

impl RefreshWorkerConfig {
    pub fn from_env() -> Self {
        let enabled = env::var("REFRESH_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let concurrency = env::var("REFRESH_WORKER_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let hard_timeout_secs: u64 = env::var("REFRESH_HARD_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);
        let base_url = env::var("SELF_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        Self {
            enabled,
            concurrency,
            hard_timeout: Duration::from_secs(hard_timeout_secs),
            base_url,
        }
    }
}

/// Seam for the actual re-fetch so the worker is testable without a server.
#[async_trait]
pub trait PathFetcher: Send + Sync {
    async fn fetch(&self, request_path: &str) -> MapsResult<()>;
}

/// Re-fetches request paths over HTTP against this service itself.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl PathFetcher for HttpFetcher {
    async fn fetch(&self, request_path: &str) -> MapsResult<()> {
        let url = format!("{}{}", self.base_url, with_cache_bypass(request_path));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MapsError::InternalError(format!("Refresh fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MapsError::InternalError(format!(
                "Refresh fetch returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Append `cache=false` so the fetch recomputes instead of reading the
/// stale entry it is refreshing.
pub fn with_cache_bypass(request_path: &str) -> String {
    if request_path.contains('?') {
        format!("{}&cache=false", request_path)
    } else {
        format!("{}?cache=false", request_path)
    }
}

/// Run the consume loop until the process exits.
pub async fn run(state: Arc<AppState>, fetcher: Arc<dyn PathFetcher>, config: RefreshWorkerConfig) {
    if !config.enabled {
        info!("Refresh worker disabled");
        return;
    }

    let consumer = format!("maps-api-{}", Uuid::new_v4());
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));

    info!(
        consumer = %consumer,
        concurrency = config.concurrency,
        timeout_secs = config.hard_timeout.as_secs(),
        "Refresh worker started"
    );

    loop {
        let claimed = state.refresh.lock().await.claim_next(&consumer).await;

        match claimed {
            Ok(Some((entry_id, job))) => {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let state = state.clone();
                let fetcher = fetcher.clone();
                let hard_timeout = config.hard_timeout;

                tokio::spawn(async move {
                    let _permit = permit;

                    match tokio::time::timeout(hard_timeout, fetcher.fetch(&job.request_path)).await
                    {
                        Ok(Ok(())) => {
                            debug!(path = %job.request_path, "cache refresh completed");
                        }
                        Ok(Err(err)) => {
                            state.metrics.record_refresh_failure();
                            warn!(path = %job.request_path, error = %err, "cache refresh failed");
                        }
                        Err(_) => {
                            state.metrics.record_refresh_failure();
                            warn!(path = %job.request_path, "cache refresh timed out");
                        }
                    }

                    if let Err(err) = state.refresh.lock().await.ack(&entry_id).await {
                        warn!(error = %err, "refresh ack failed");
                    }
                });
            }
            // Blocking read returned empty; go around again.
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "refresh claim failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio_test::assert_ok;

    #[test]
    fn test_cache_bypass_appending() {
        assert_eq!(
            with_cache_bypass("/api/accounts/layers/7/info/?country_id=1"),
            "/api/accounts/layers/7/info/?country_id=1&cache=false"
        );
        assert_eq!(
            with_cache_bypass("/api/accounts/layers/7/info/"),
            "/api/accounts/layers/7/info/?cache=false"
        );
    }

    struct CountingFetcher {
        calls: AtomicU64,
    }

    #[async_trait]
    impl PathFetcher for CountingFetcher {
        async fn fetch(&self, _request_path: &str) -> MapsResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_fetcher_seam_is_object_safe() {
        let fetcher: Arc<dyn PathFetcher> = Arc::new(CountingFetcher { calls: AtomicU64::new(0) });
        tokio_test::block_on(async {
            assert_ok!(fetcher.fetch("/api/x/").await);
        });
    }
}
