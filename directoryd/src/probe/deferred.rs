use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use shared::protocol::StatusReport;
use super::status::StatusResolver;

/// Status of one service that is never probed until asked for, and probed
/// at most once for the life of the cell. Re-probing means a new cell.
#[derive(Debug)]
pub struct DeferredStatus {
    url: String,
    report: OnceCell<StatusReport>,
}

impl DeferredStatus {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            report: OnceCell::new(),
        }
    }

    pub fn peek(&self) -> Option<&StatusReport> {
        self.report.get()
    }

    pub async fn get_or_probe(&self, resolver: &StatusResolver, cancel: &CancellationToken) -> &StatusReport {
        self.report
            .get_or_init(|| resolver.resolve(&self.url, cancel))
            .await
    }
}
