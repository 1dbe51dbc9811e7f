use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, UPGRADE_INSECURE_REQUESTS};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod browser;
pub mod proxy;
pub mod user_agents;
pub mod webdriver;

pub use browser::{BrowserDriver, BrowserLauncher, BrowserSlot, ElementRef, LaunchOptions, ScopedBrowser};
pub use proxy::{FreeProxyProvider, ProxyEntry, ProxyPool, ProxyProvenance, ProxyProvider};
pub use webdriver::WebDriverLauncher;

use crate::config::EvasionConfig;
use crate::{AcquireError, AcquireResult};

/// Inclusive interval pacing delays are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PacingRange {
    pub min: Duration,
    pub max: Duration,
}

impl PacingRange {
    pub fn from_secs(min: f64, max: f64) -> Self {
        let min = Duration::from_secs_f64(min.max(0.0));
        let max = Duration::from_secs_f64(max.max(0.0)).max(min);
        Self { min, max }
    }

    /// Draw a delay uniformly from the interval
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// The face currently presented to the upstream service
#[derive(Debug, Clone, Serialize)]
pub struct EvasionIdentity {
    pub user_agent: String,
    pub proxy: Option<ProxyEntry>,
    pub pacing: PacingRange,
}

impl EvasionIdentity {
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy.as_ref().map(ProxyEntry::url)
    }
}

/// Per-request evasion parameters plus the session's single headless browser.
///
/// One session serves one acquisition at a time; run several sessions for
/// concurrent acquisitions.
pub struct EvasionSession {
    settings: EvasionConfig,
    user_agents: Vec<String>,
    proxies: Arc<Vec<ProxyEntry>>,
    identity: RwLock<Arc<EvasionIdentity>>,
    launcher: Arc<dyn BrowserLauncher>,
    browser: Arc<BrowserSlot>,
    cancel: CancellationToken,
}

impl EvasionSession {
    pub fn new(
        settings: EvasionConfig,
        proxies: Arc<Vec<ProxyEntry>>,
        launcher: Arc<dyn BrowserLauncher>,
        cancel: CancellationToken,
    ) -> Self {
        let user_agents = user_agents::generate_pool();
        let initial = Self::draw_identity(&settings, &user_agents, &proxies);

        Self {
            settings,
            user_agents,
            proxies,
            identity: RwLock::new(Arc::new(initial)),
            launcher,
            browser: Arc::new(BrowserSlot::default()),
            cancel,
        }
    }

    fn draw_identity(settings: &EvasionConfig, user_agents: &[String], proxies: &[ProxyEntry]) -> EvasionIdentity {
        let mut rng = rand::thread_rng();

        let user_agent = if settings.user_agent_rotation {
            user_agents
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| user_agents::DEFAULT_USER_AGENT.to_string())
        } else {
            user_agents::DEFAULT_USER_AGENT.to_string()
        };

        let proxy = if settings.proxy_rotation {
            proxies.choose(&mut rng).cloned()
        } else {
            None
        };

        EvasionIdentity {
            user_agent,
            proxy,
            pacing: PacingRange::from_secs(settings.delay_min_secs, settings.delay_max_secs),
        }
    }

    /// Rotate to a fresh identity; readers see either the old or the new one, never a mix
    pub fn next_identity(&self) -> Arc<EvasionIdentity> {
        let identity = Arc::new(Self::draw_identity(&self.settings, &self.user_agents, &self.proxies));

        *self.identity.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = identity.clone();

        tracing::debug!(
            "Rotated identity: proxy={:?} ua={}",
            identity.proxy.as_ref().map(|p| &p.address),
            identity.user_agent
        );
        identity
    }

    pub fn current_identity(&self) -> Arc<EvasionIdentity> {
        self.identity
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn proxies(&self) -> &[ProxyEntry] {
        &self.proxies
    }

    pub fn pacing_delay(&self) -> Duration {
        self.current_identity().pacing.sample()
    }

    /// Block for one pacing delay before a network-facing operation
    pub async fn pace(&self) -> AcquireResult<()> {
        self.wait(self.pacing_delay()).await
    }

    /// Block for `factor` pacing delays, e.g. while a page settles
    pub async fn pace_scaled(&self, factor: u32) -> AcquireResult<()> {
        self.wait(self.pacing_delay() * factor).await
    }

    /// Cancellable sleep bound to the session's token
    pub async fn wait(&self, duration: Duration) -> AcquireResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(AcquireError::Cancelled),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// HTTP client presenting the current identity's headers and proxy
    pub fn http_client(&self) -> crate::Result<reqwest::Client> {
        let identity = self.current_identity();

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let mut builder = reqwest::Client::builder()
            .user_agent(identity.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(30));

        builder = match identity.proxy_url() {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(&proxy)?),
            None => builder.no_proxy(),
        };

        Ok(builder.build()?)
    }

    /// Open the session's browser, closing any browser still open.
    ///
    /// The returned scope must be released with [`ScopedBrowser::release`].
    pub async fn acquire_browser(&self) -> AcquireResult<ScopedBrowser> {
        if self.cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        if let Some(previous) = self.browser.take() {
            tracing::info!("Closing previously open browser before launching a new one");
            if let Err(e) = previous.close().await {
                tracing::warn!("Error closing previous browser: {:#}", e);
                previous.abort();
            }
        }

        let identity = self.current_identity();
        let options = LaunchOptions {
            user_agent: identity.user_agent.clone(),
            proxy: identity.proxy_url(),
            startup_script: browser::STEALTH_SCRIPT,
        };

        let driver = tokio::select! {
            launched = self.launcher.launch(&options) => launched.map_err(|e| {
                tracing::error!("Error initializing browser: {:#}", e);
                AcquireError::EvasionUnavailable(format!("{:#}", e))
            })?,
            _ = self.cancel.cancelled() => return Err(AcquireError::Cancelled),
        };

        let (generation, displaced) = self.browser.install(driver.clone());
        if let Some(displaced) = displaced {
            if let Err(e) = displaced.close().await {
                tracing::warn!("Error closing displaced browser: {:#}", e);
                displaced.abort();
            }
        }

        tracing::debug!("Browser {} launched", generation);
        let scoped = ScopedBrowser::new(driver, generation, self.browser.clone());

        if let Err(e) = self.pace().await {
            scoped.release().await;
            return Err(e);
        }

        Ok(scoped)
    }

    /// Whether a browser is currently open in this session
    pub fn has_open_browser(&self) -> bool {
        self.browser.is_occupied()
    }
}
