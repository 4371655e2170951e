//! Observer Prober (component B): polls each observer's `/state.json` and
//! rejects responses with excessive clock skew.

use crate::model::{MemberState, ObservedState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CLOCK_SKEW: chrono::Duration = chrono::Duration::seconds(5);

pub struct ObserverProber {
    client: reqwest::Client,
}

impl Default for ObserverProber {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverProber {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Cheap clone of the underlying HTTP client (an `Arc` internally), for
    /// handing to an independent probe task.
    #[must_use]
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// Fetches `{base_url}/state.json`. Returns `None` only when the
    /// response is rejected outright (unparseable `Date` header or clock
    /// skew beyond tolerance); connection failures still yield a state
    /// with `connection: false` so the caller can record the attempt.
    pub async fn fetch(&self, name: &str, base_url: &str) -> Option<ObservedState> {
        fetch(&self.client, name, base_url).await
    }
}

/// Standalone fetch over an owned client, so concurrent probes for distinct
/// observers don't need to share a borrow of the prober.
pub async fn fetch(client: &reqwest::Client, name: &str, base_url: &str) -> Option<ObservedState> {
    let fetch_time = Utc::now();
    let url = format!("{}/state.json", base_url.trim_end_matches('/'));

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(observer = name, %error, url, "failed to fetch observer state");
            return Some(ObservedState {
                connection: false,
                fetch_time,
                members: HashMap::new(),
            });
        }
    };

    let Some(date_header) = response.headers().get(reqwest::header::DATE).and_then(|v| v.to_str().ok()) else {
        tracing::error!(observer = name, "observer response missing Date header, ignoring");
        return None;
    };

    let Ok(remote_time) = DateTime::parse_from_rfc2822(date_header) else {
        tracing::error!(observer = name, date = date_header, "failed to parse observer Date header, ignoring");
        return None;
    };
    let remote_time = remote_time.with_timezone(&Utc);

    let skew = (fetch_time - remote_time).abs();
    if skew > MAX_CLOCK_SKEW {
        tracing::error!(observer = name, skew_ms = skew.num_milliseconds(), "clock skew too large, ignoring response");
        return None;
    }

    match response.json::<HashMap<String, MemberState>>().await {
        Ok(members) => Some(ObservedState {
            connection: true,
            fetch_time,
            members,
        }),
        Err(error) => {
            tracing::warn!(observer = name, %error, "failed to decode observer state body");
            Some(ObservedState {
                connection: false,
                fetch_time,
                members: HashMap::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn skew_tolerance_boundary() {
        let now = Utc::now();
        let within = now - ChronoDuration::seconds(4);
        assert!((now - within).abs() <= MAX_CLOCK_SKEW);

        let outside = now - ChronoDuration::seconds(6);
        assert!((now - outside).abs() > MAX_CLOCK_SKEW);
    }
}
