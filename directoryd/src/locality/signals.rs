use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use tokio_util::sync::CancellationToken;
use url::Url;
use shared::protocol::FAVICON_PATH;
use crate::probe::{bounded, Prober};
use super::LocalitySignal;

/// Any completed response from the beacon counts, status and body unread.
pub struct OpaqueFetchSignal {
    prober: Prober,
}

impl OpaqueFetchSignal {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }
}

#[async_trait]
impl LocalitySignal for OpaqueFetchSignal {
    fn name(&self) -> &'static str {
        "opaque-fetch"
    }

    async fn detect(&self, target: &Url, budget: Duration, cancel: &CancellationToken) -> bool {
        self.prober
            .probe(target.as_str(), Method::GET, budget, cancel)
            .await
            .reachable
    }
}

/// Loads `<beacon>/favicon.ico` and succeeds only if what comes back is an
/// image. A 404 page or any non-image body is a failure, just as an image
/// element would fire its error event.
pub struct ImageLoadSignal {
    client: Client,
}

impl ImageLoadSignal {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LocalitySignal for ImageLoadSignal {
    fn name(&self) -> &'static str {
        "image-load"
    }

    async fn detect(&self, target: &Url, budget: Duration, cancel: &CancellationToken) -> bool {
        let mut icon = target.clone();
        icon.set_path(FAVICON_PATH);

        let request = self.client.get(icon.clone()).header(ACCEPT, "image/*");
        let load = async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                return Ok::<bool, reqwest::Error>(false);
            }
            let declared_image = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("image/"));
            let body = response.bytes().await?;
            Ok::<bool, reqwest::Error>(!body.is_empty() && (declared_image || looks_like_image(&body)))
        };

        match bounded(load, budget, cancel).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::debug!("Image probe {} failed: {}", icon, e);
                false
            }
        }
    }
}

/// Sniff the common favicon formats by magic number.
pub fn looks_like_image(body: &[u8]) -> bool {
    const MAGIC: &[&[u8]] = &[
        &[0x00, 0x00, 0x01, 0x00], // ico
        &[0x00, 0x00, 0x02, 0x00], // cur
        &[0x89, b'P', b'N', b'G'],
        b"GIF8",
        &[0xFF, 0xD8, 0xFF],
        b"BM",
    ];

    if MAGIC.iter().any(|m| body.starts_with(m)) {
        return true;
    }
    if body.len() >= 12 && &body[..4] == b"RIFF" && &body[8..12] == b"WEBP" {
        return true;
    }
    let head = String::from_utf8_lossy(&body[..body.len().min(256)]).to_ascii_lowercase();
    head.trim_start().starts_with("<svg") || (head.trim_start().starts_with("<?xml") && head.contains("<svg"))
}
