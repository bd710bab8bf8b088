//! Multi-signal locality resolution.
//!
//! Several independent [`LocalitySignal`]s probe the same beacon with the
//! same time budget. Their answers are combined by a [`FusionPolicy`]. One
//! technique missing a reachable beacon is expected, so by default a single
//! positive signal decides.

pub mod signals;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use url::Url;
use shared::protocol::{LocalityReport, SignalResult};
use shared::types::LocalityVerdict;
use crate::probe::Prober;
use self::signals::{ImageLoadSignal, OpaqueFetchSignal};

/// One technique for deciding whether a beacon answers from here.
#[async_trait]
pub trait LocalitySignal: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when the beacon gave positive evidence of reachability within
    /// `budget`. Errors and timeouts are negative evidence.
    async fn detect(&self, target: &Url, budget: Duration, cancel: &CancellationToken) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionPolicy {
    /// Local if any signal is positive
    #[default]
    Any,
    /// Local only if every signal is positive
    All,
}

impl FusionPolicy {
    pub fn fuse(self, positives: &[bool]) -> bool {
        match self {
            Self::Any => positives.iter().any(|p| *p),
            Self::All => !positives.is_empty() && positives.iter().all(|p| *p),
        }
    }
}

/// Prefix `http://` onto beacons configured as bare hosts.
pub fn normalize_beacon(beacon: &str) -> Option<Url> {
    let beacon = beacon.trim();
    if beacon.is_empty() {
        return None;
    }
    if beacon.contains("://") {
        Url::parse(beacon).ok()
    } else {
        Url::parse(&format!("http://{}", beacon)).ok()
    }
}

pub struct LocalityResolver {
    signals: Vec<Arc<dyn LocalitySignal>>,
    fusion: FusionPolicy,
    budget: Duration,
}

impl LocalityResolver {
    pub fn new(fusion: FusionPolicy, budget: Duration) -> Self {
        Self {
            signals: Vec::new(),
            fusion,
            budget,
        }
    }

    /// Opaque fetch plus image load, the pair used in production.
    pub fn standard(prober: Prober, client: reqwest::Client, fusion: FusionPolicy, budget: Duration) -> Self {
        Self::new(fusion, budget)
            .with_signal(OpaqueFetchSignal::new(prober))
            .with_signal(ImageLoadSignal::new(client))
    }

    pub fn with_signal(mut self, signal: impl LocalitySignal + 'static) -> Self {
        self.signals.push(Arc::new(signal));
        self
    }

    /// Runs every signal concurrently and waits for all of them to settle.
    /// Without a beacon the verdict is `Unknown`.
    pub async fn resolve(&self, beacon: Option<&str>, cancel: &CancellationToken) -> LocalityReport {
        let Some(beacon) = beacon.filter(|b| !b.trim().is_empty()) else {
            return LocalityReport::unknown();
        };

        let Some(target) = normalize_beacon(beacon) else {
            tracing::warn!("Locality beacon {:?} is not a valid URL, treating as remote", beacon);
            return LocalityReport {
                verdict: LocalityVerdict::Remote,
                signals: Vec::new(),
            };
        };

        let checks = self.signals.iter().map(|signal| {
            let target = &target;
            async move {
                let positive = tokio::time::timeout(self.budget, signal.detect(target, self.budget, cancel))
                    .await
                    .unwrap_or(false);
                SignalResult {
                    name: signal.name().to_string(),
                    positive,
                }
            }
        });
        let signals = join_all(checks).await;

        let positives: Vec<bool> = signals.iter().map(|s| s.positive).collect();
        let verdict = LocalityVerdict::from_local(self.fusion.fuse(&positives));
        tracing::debug!("Locality of {} resolved to {:?} ({:?})", target, verdict, signals);

        LocalityReport { verdict, signals }
    }
}

/// Resolves each beacon at most once for the lifetime of the memo.
/// One memo belongs to one render; nothing is shared across requests.
#[derive(Default)]
pub struct LocalityMemo {
    checked: Mutex<HashMap<String, Arc<OnceCell<LocalityReport>>>>,
}

impl LocalityMemo {
    pub async fn resolve(
        &self,
        resolver: &LocalityResolver,
        beacon: Option<&str>,
        cancel: &CancellationToken,
    ) -> LocalityReport {
        let Some(beacon) = beacon.map(str::trim).filter(|b| !b.is_empty()) else {
            return LocalityReport::unknown();
        };

        let cell = {
            let mut checked = self.checked.lock().await;
            checked.entry(beacon.to_string()).or_default().clone()
        };

        cell.get_or_init(|| resolver.resolve(Some(beacon), cancel))
            .await
            .clone()
    }
}
