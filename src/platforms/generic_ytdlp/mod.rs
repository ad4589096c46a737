use std::path::PathBuf;

use async_trait::async_trait;
use relayget_core::models::settings::ProxySettings;
use tokio::sync::{mpsc, OnceCell};

use crate::core::ytdlp;
use crate::models::media::{MediaProbe, RequestConfig, TransferEvent, TransferOutput};
use crate::platforms::traits::MediaExtractor;

/// Production extractor backed by the yt-dlp executable. The binary is
/// located (or fetched) on first use and reused afterwards.
pub struct YtdlpExtractor {
    bin_dir: Option<PathBuf>,
    proxy: ProxySettings,
    binary: OnceCell<PathBuf>,
}

impl YtdlpExtractor {
    pub fn new(bin_dir: Option<PathBuf>, proxy: ProxySettings) -> Self {
        Self {
            bin_dir,
            proxy,
            binary: OnceCell::new(),
        }
    }

    async fn binary(&self) -> anyhow::Result<&PathBuf> {
        self.binary
            .get_or_try_init(|| ytdlp::ensure_ytdlp(self.bin_dir.as_deref(), &self.proxy))
            .await
    }
}

#[async_trait]
impl MediaExtractor for YtdlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn probe(&self, url: &str, config: &RequestConfig) -> anyhow::Result<MediaProbe> {
        let bin = self.binary().await?;
        ytdlp::probe(bin, self.bin_dir.as_deref(), url, config).await
    }

    async fn transfer(
        &self,
        url: &str,
        config: &RequestConfig,
        progress: mpsc::Sender<TransferEvent>,
    ) -> anyhow::Result<TransferOutput> {
        let bin = self.binary().await?;
        tracing::debug!(
            "[ytdlp] transfer {} with client={} format={}",
            url,
            config.player_client,
            config.format_selector
        );
        ytdlp::transfer(bin, self.bin_dir.as_deref(), url, config, progress).await
    }
}
