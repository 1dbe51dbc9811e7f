// Browser relay strategy: drives a third-party conversion site in the
// session's headless browser and picks the file up from the download dir.

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{AcquisitionStrategy, MediaKind, StrategyContext};
use crate::config::RelayConfig;
use crate::evasion::{ElementRef, EvasionSession, ScopedBrowser};
use crate::utils::files_with_extension;
use crate::Result;

const UI_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct BrowserRelay {
    settings: RelayConfig,
}

impl BrowserRelay {
    pub fn new(settings: RelayConfig) -> Self {
        Self { settings }
    }

    fn relay_url(&self, ctx: &StrategyContext<'_>) -> String {
        format!("{}{}", self.settings.base_url, urlencoding::encode(ctx.id.as_str()))
    }

    async fn drive(&self, browser: &ScopedBrowser, ctx: &StrategyContext<'_>) -> Result<PathBuf> {
        let session = ctx.session;

        browser
            .set_download_dir(ctx.output_dir)
            .await
            .context("Failed to configure browser downloads")?;

        let url = self.relay_url(ctx);
        tracing::debug!("Opening relay page {}", url);
        browser.navigate(&url).await?;
        session.pace_scaled(2).await?;

        let trigger = self
            .wait_for_element(browser, session, &self.settings.trigger_selector)
            .await?;
        browser.click(&trigger).await.context("Failed to click download button")?;
        session.pace_scaled(3).await?;

        let link = self
            .wait_for_element(browser, session, &self.settings.link_selector)
            .await?;
        browser.click(&link).await.context("Failed to click download link")?;

        self.wait_for_download(session, ctx.output_dir).await
    }

    /// Poll until `selector` matches, bounded by the UI timeout
    async fn wait_for_element(
        &self,
        browser: &ScopedBrowser,
        session: &EvasionSession,
        selector: &str,
    ) -> Result<ElementRef> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.ui_timeout_secs);

        loop {
            if let Some(element) = browser.find_elements(selector).await?.into_iter().next() {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "Timed out after {}s waiting for {}",
                    self.settings.ui_timeout_secs,
                    selector
                );
            }
            session.wait(UI_POLL_INTERVAL).await?;
        }
    }

    /// Poll the download dir for a finished mp4 above the size threshold
    async fn wait_for_download(&self, session: &EvasionSession, dir: &Path) -> Result<PathBuf> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.download_wait_secs);

        loop {
            if let Some(found) = completed_download(dir, self.settings.min_file_bytes) {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "No mp4 above {} bytes appeared in {} within {}s",
                    self.settings.min_file_bytes,
                    dir.display(),
                    self.settings.download_wait_secs
                );
            }
            session.wait(DOWNLOAD_POLL_INTERVAL).await?;
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for BrowserRelay {
    fn name(&self) -> &'static str {
        "browser-relay"
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<PathBuf> {
        if ctx.kind != MediaKind::Video {
            anyhow::bail!("Relay only produces video");
        }

        let browser = ctx.session.acquire_browser().await?;
        let downloaded = self.drive(&browser, ctx).await;
        browser.release().await;

        let downloaded = downloaded?;
        let canonical = ctx.canonical_path();
        if downloaded != canonical {
            fs_err::rename(&downloaded, &canonical)?;
        }
        Ok(canonical)
    }
}

/// In-progress downloads carry a `.crdownload` extension and never match
fn completed_download(dir: &Path, min_bytes: u64) -> Option<PathBuf> {
    files_with_extension(dir, MediaKind::Video.extension())
        .into_iter()
        .find(|(_, size)| *size > min_bytes)
        .map(|(path, _)| path)
}
