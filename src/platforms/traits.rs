use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::media::{MediaProbe, RequestConfig, TransferEvent, TransferOutput};

/// External extraction collaborator: a metadata probe followed by the
/// actual transfer into `config.output_dir`.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn probe(&self, url: &str, config: &RequestConfig) -> anyhow::Result<MediaProbe>;
    async fn transfer(
        &self,
        url: &str,
        config: &RequestConfig,
        progress: mpsc::Sender<TransferEvent>,
    ) -> anyhow::Result<TransferOutput>;
}
