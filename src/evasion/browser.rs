use async_trait::async_trait;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::Result;

/// Startup script hiding the `navigator.webdriver` automation flag
pub const STEALTH_SCRIPT: &str = "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// Opaque handle to an element located in the current page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// Parameters for launching one browser instance
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub startup_script: &'static str,
}

/// A live headless browser
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn title(&self) -> Result<String>;

    async fn page_source(&self) -> Result<String>;

    async fn find_elements(&self, css_selector: &str) -> Result<Vec<ElementRef>>;

    async fn click(&self, element: &ElementRef) -> Result<()>;

    /// Allow downloads and route them into `dir`
    async fn set_download_dir(&self, dir: &Path) -> Result<()>;

    /// Graceful shutdown; must be idempotent
    async fn close(&self) -> Result<()>;

    /// Synchronous last-resort kill used when a scope is dropped without release
    fn abort(&self);
}

/// Opens browsers configured with the session's identity
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser. Implementations must not leave a process behind on error.
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn BrowserDriver>>;
}

/// The single live-browser slot of one session
#[derive(Default)]
pub struct BrowserSlot {
    current: Mutex<Option<(u64, Arc<dyn BrowserDriver>)>>,
    generation: AtomicU64,
}

impl BrowserSlot {
    /// Remove whatever browser is currently installed
    pub(crate) fn take(&self) -> Option<Arc<dyn BrowserDriver>> {
        self.lock().take().map(|(_, driver)| driver)
    }

    /// Install a browser, returning its generation and any browser it displaced
    pub(crate) fn install(&self, driver: Arc<dyn BrowserDriver>) -> (u64, Option<Arc<dyn BrowserDriver>>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let displaced = self.lock().replace((generation, driver)).map(|(_, d)| d);
        (generation, displaced)
    }

    /// Clear the slot only if it still holds `generation`
    fn remove_if(&self, generation: u64) -> bool {
        let mut current = self.lock();
        if matches!(current.as_ref(), Some((installed, _)) if *installed == generation) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, Arc<dyn BrowserDriver>)>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped ownership of the session's browser.
///
/// Call [`ScopedBrowser::release`] on every path; dropping an unreleased
/// scope kills the browser synchronously.
pub struct ScopedBrowser {
    driver: Arc<dyn BrowserDriver>,
    generation: u64,
    slot: Arc<BrowserSlot>,
    released: bool,
}

impl ScopedBrowser {
    pub(crate) fn new(driver: Arc<dyn BrowserDriver>, generation: u64, slot: Arc<BrowserSlot>) -> Self {
        Self {
            driver,
            generation,
            slot,
            released: false,
        }
    }

    /// Close the browser and free the session slot
    pub async fn release(mut self) {
        self.released = true;
        self.slot.remove_if(self.generation);

        if let Err(e) = self.driver.close().await {
            tracing::warn!("Error closing browser: {:#}", e);
            self.driver.abort();
        }
        tracing::debug!("Browser {} released", self.generation);
    }
}

impl Deref for ScopedBrowser {
    type Target = dyn BrowserDriver;

    fn deref(&self) -> &Self::Target {
        self.driver.as_ref()
    }
}

impl Drop for ScopedBrowser {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Browser {} dropped without release, killing it", self.generation);
            self.slot.remove_if(self.generation);
            self.driver.abort();
        }
    }
}
