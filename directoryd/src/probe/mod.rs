//! Bounded-time network probes.
//!
//! Every call here is time-boxed by a deadline and by a caller-owned
//! [`CancellationToken`]. Either one firing drops the in-flight request and
//! the call resolves to a failure, never to an indeterminate state.

pub mod deferred;
pub mod status;

use std::future::Future;
use std::time::{Duration, Instant};
use reqwest::header::CACHE_CONTROL;
use reqwest::{redirect, Client, Method};
use tokio_util::sync::CancellationToken;
use crate::error::FetchError;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// A response arrived, whatever its status code
    pub reachable: bool,
    /// Wall time around the whole attempt, failures included
    pub latency_ms: u64,
    pub http_status: Option<u16>,
}

/// Run `fut` until it completes, `timeout` elapses or `cancel` fires.
pub async fn bounded<T, F>(fut: F, timeout: Duration, cancel: &CancellationToken) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(inner) => inner.map_err(FetchError::from),
            Err(_) => Err(FetchError::Timeout(timeout)),
        },
    }
}

/// Issues single probes. Redirects are not followed so that a 3xx is
/// reported as the answer it is.
#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
}

impl Prober {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub async fn probe(
        &self,
        url: &str,
        method: Method,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let start = Instant::now();
        let request = self
            .client
            .request(method, url)
            .header(CACHE_CONTROL, "no-store")
            .send();

        let result = bounded(request, timeout, cancel).await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) => {
                let code = response.status().as_u16();
                tracing::debug!("Probe {} answered {} in {}ms", url, code, latency_ms);
                ProbeOutcome {
                    reachable: true,
                    latency_ms,
                    http_status: Some(code),
                }
            }
            Err(e) => {
                tracing::debug!("Probe {} failed after {}ms: {}", url, latency_ms, e);
                ProbeOutcome {
                    reachable: false,
                    latency_ms,
                    http_status: None,
                }
            }
        }
    }
}
