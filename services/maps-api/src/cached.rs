//! Soft-cache wrapper around pure handler computations.
//!
//! Handlers compute `request params -> bytes`; cacheability lives here.
//! Stale entries are served immediately while a refresh of the recorded
//! request path is enqueued, and a cache-store failure is demoted to a
//! miss so correctness never depends on Redis being up.

use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use maps_common::MapsResult;
use storage::{EntryState, RefreshJob};

use crate::state::AppState;

/// How long one stale read suppresses further refresh enqueues for a key.
const REFRESH_DEBOUNCE_TTL: Duration = Duration::from_secs(60);

/// Serve `key` from the soft cache, computing and repopulating on miss or
/// bypass. The logical key doubles as the refresh request path.
pub async fn serve_cached<F, Fut>(
    state: &AppState,
    key: &str,
    bypass: bool,
    compute: F,
) -> MapsResult<Bytes>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = MapsResult<Bytes>>,
{
    if !bypass {
        let lookup = state.cache.lock().await.get(key).await;
        match lookup {
            Ok(Some(entry)) => match entry.state(Utc::now()) {
                EntryState::Fresh => {
                    state.metrics.record_cache_hit();
                    return Ok(entry.value);
                }
                EntryState::Stale => {
                    // Never block the caller: serve the old value and let
                    // the background worker recompute.
                    state.metrics.record_stale_served();
                    schedule_refresh(state, key, entry.request_path.clone()).await;
                    return Ok(entry.value);
                }
            },
            Ok(None) => state.metrics.record_cache_miss(),
            Err(err) => {
                warn!(error = %err, "cache read failed; treating as miss");
                state.metrics.record_cache_miss();
            }
        }
    }

    let value = compute().await?;

    let stored = state
        .cache
        .lock()
        .await
        .set(key, &value, Some(key), state.soft_ttl)
        .await;
    if let Err(err) = stored {
        warn!(error = %err, "cache write failed");
    }

    Ok(value)
}

/// Enqueue a background re-fetch for a stale entry, debounced per key.
async fn schedule_refresh(state: &AppState, key: &str, request_path: Option<String>) {
    let Some(path) = request_path else {
        return;
    };

    let acquired = state
        .cache
        .lock()
        .await
        .try_acquire_refresh(key, REFRESH_DEBOUNCE_TTL)
        .await;

    match acquired {
        Ok(true) => {
            let job = RefreshJob::new(path);
            match state.refresh.lock().await.enqueue(&job).await {
                Ok(_) => state.metrics.record_refresh_enqueued(),
                Err(err) => warn!(error = %err, "refresh enqueue failed"),
            }
        }
        Ok(false) => state.metrics.record_refresh_debounced(),
        Err(err) => warn!(error = %err, "refresh guard failed"),
    }
}
