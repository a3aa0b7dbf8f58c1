//! Self-ping loop.
//!
//! Some free hosting tiers put a process to sleep when it sees no traffic.
//! When `keepalive.enabled` is set, a background task requests the service's
//! own URL at random intervals of up to `keepalive.max_interval_ms`.

use crate::config::KeepAliveConfig;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Random delay in `[1, max_interval_ms]` milliseconds.
pub fn next_interval(max_interval_ms: u64) -> Duration {
    let millis = rand::thread_rng().gen_range(1..=max_interval_ms.max(1));
    Duration::from_millis(millis)
}

/// Start the loop. Returns `None` when keep-alive is disabled.
pub fn spawn(config: &KeepAliveConfig, url: String) -> Option<JoinHandle<()>> {
    if !config.enabled {
        debug!("Keep-alive disabled");
        return None;
    }

    let max_interval_ms = config.max_interval_ms;
    let client = reqwest::Client::new();
    info!(url = %url, max_interval_ms, "Starting keep-alive loop");

    Some(tokio::spawn(async move {
        loop {
            let delay = next_interval(max_interval_ms);
            debug!(next_ping_secs = delay.as_secs(), "Next keep-alive ping scheduled");
            tokio::time::sleep(delay).await;

            match client.get(&url).send().await {
                Ok(response) => debug!(status = response.status().as_u16(), "Self-ping successful"),
                Err(e) => warn!(error = %e, "Error in self-ping"),
            }
        }
    }))
}
