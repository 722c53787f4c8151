//! HealthProbe - one HTTP health check against one named service
//!
//! Retries up to `retries` extra times with a fixed delay. A retry is consumed
//! only on network failure or an unexpected response, never on success. The
//! probe never returns an error past its boundary: exhaustion yields a
//! `ServiceHealth` with `reachable = false` and `last_error` populated.

use std::time::{Duration, Instant};

use tracing::{instrument, trace, warn};

use crate::ServiceHealth;
use crate::config::ServiceConfig;

#[derive(Debug, Clone)]
pub struct Probe {
    /// HTTP client (reused across requests; timeouts are set per probe)
    client: reqwest::Client,
}

impl Default for Probe {
    fn default() -> Self {
        Self::new()
    }
}

impl Probe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    #[instrument(skip(self, service), fields(service = %service.name))]
    pub async fn check(&self, service: &ServiceConfig) -> ServiceHealth {
        let timeout = Duration::from_secs(service.timeout);
        let retry_delay = Duration::from_secs(service.retry_delay);

        let mut last_error = None;
        let mut last_status = None;

        for attempt in 0..=service.retries {
            if attempt > 0 {
                trace!("retrying {} (attempt {})", service.url, attempt + 1);
                tokio::time::sleep(retry_delay).await;
            }

            let start = Instant::now();
            let response = self
                .client
                .get(&service.url)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let latency_ms = start.elapsed().as_millis() as u64;
                    last_status = Some(status);

                    if !self.status_accepted(service, status) {
                        last_error = Some(format!("unexpected status code: {status}"));
                        continue;
                    }

                    if let Some(error) = self.body_mismatch(service, response).await {
                        last_error = Some(error);
                        continue;
                    }

                    return ServiceHealth {
                        name: service.name.clone(),
                        reachable: true,
                        latency_ms: Some(latency_ms),
                        http_status: Some(status),
                        last_error: None,
                    };
                }
                Err(e) => {
                    warn!("{}: probe request failed: {e}", service.url);
                    last_error = Some(e.to_string());
                }
            }
        }

        ServiceHealth {
            name: service.name.clone(),
            reachable: false,
            latency_ms: None,
            http_status: last_status,
            last_error,
        }
    }

    fn status_accepted(&self, service: &ServiceConfig, status: u16) -> bool {
        match &service.expected_status {
            Some(expected) => expected.contains(&status),
            None => (200..300).contains(&status),
        }
    }

    /// Returns a description of the mismatch, or `None` if the body is acceptable.
    async fn body_mismatch(&self, service: &ServiceConfig, response: reqwest::Response) -> Option<String> {
        let pattern = service.body_pattern.as_ref()?;

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Some(format!("failed to read response body: {e}")),
        };

        match regex::Regex::new(pattern) {
            Ok(re) if re.is_match(&body) => None,
            Ok(_) => Some(format!("body did not match pattern '{pattern}'")),
            Err(e) => Some(format!("invalid body pattern '{pattern}': {e}")),
        }
    }
}
