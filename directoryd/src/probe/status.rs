use std::time::Duration;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use shared::protocol::{ServiceStatus, StatusReport};
use super::Prober;

/// Single authoritative reachability + latency probe for display.
#[derive(Debug, Clone)]
pub struct StatusResolver {
    prober: Prober,
    timeout: Duration,
    check_ip_timeout: Duration,
}

impl StatusResolver {
    pub fn new(prober: Prober, timeout: Duration, check_ip_timeout: Duration) -> Self {
        Self {
            prober,
            timeout,
            check_ip_timeout,
        }
    }

    /// One HEAD attempt, no retries. Anything below 500 counts as online:
    /// the server answered, it may just want credentials.
    pub async fn resolve(&self, url: &str, cancel: &CancellationToken) -> StatusReport {
        let outcome = self.prober.probe(url, Method::HEAD, self.timeout, cancel).await;
        let status = match outcome.http_status {
            Some(code) if code < 500 => ServiceStatus::Online,
            _ => ServiceStatus::Offline,
        };

        StatusReport {
            status,
            latency_ms: outcome.latency_ms,
            http_status: outcome.http_status,
        }
    }

    /// Existence-only check: did the origin answer at all.
    pub async fn is_reachable(&self, url: &str, cancel: &CancellationToken) -> bool {
        self.prober
            .probe(url, Method::HEAD, self.check_ip_timeout, cancel)
            .await
            .reachable
    }
}
