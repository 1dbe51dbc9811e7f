// Fakes shared by unit tests across modules

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EvasionConfig;
use crate::evasion::{BrowserDriver, BrowserLauncher, ElementRef, EvasionSession, LaunchOptions};
use crate::Result;

/// Rotation on, no pacing
pub fn quiet_settings() -> EvasionConfig {
    EvasionConfig {
        delay_min_secs: 0.0,
        delay_max_secs: 0.0,
        ..EvasionConfig::default()
    }
}

pub fn quiet_session(launcher: Arc<FakeLauncher>) -> Arc<EvasionSession> {
    Arc::new(EvasionSession::new(
        quiet_settings(),
        Arc::new(Vec::new()),
        launcher,
        CancellationToken::new(),
    ))
}

/// Rotation on, every pacing delay exactly `secs`
pub fn paced_session(launcher: Arc<FakeLauncher>, secs: f64) -> Arc<EvasionSession> {
    let settings = EvasionConfig {
        delay_min_secs: secs,
        delay_max_secs: secs,
        ..EvasionConfig::default()
    };
    Arc::new(EvasionSession::new(
        settings,
        Arc::new(Vec::new()),
        launcher,
        CancellationToken::new(),
    ))
}

/// Loopback HTTP server answering every request with the same body
pub struct StaticServer {
    base: String,
    requests: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StaticServer {
    pub async fn start(body: Vec<u8>, content_type: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(body);

        let counter = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        content_type,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base, requests, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What every fake browser shows
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub title: String,
    pub html: String,
    /// (css selector, element id) pairs present on every page
    pub elements: Vec<(&'static str, &'static str)>,
    /// Clicking this element id drops a file of this size into the download dir
    pub download_on_click: Option<(&'static str, &'static str, usize)>,
    pub fail_navigation: bool,
}

pub struct FakeLauncher {
    open: Arc<AtomicUsize>,
    launches: AtomicUsize,
    fail: bool,
    page: FakePage,
    visited: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    fn build(fail: bool, page: FakePage) -> Arc<Self> {
        Arc::new(Self {
            open: Arc::new(AtomicUsize::new(0)),
            launches: AtomicUsize::new(0),
            fail,
            page,
            visited: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::build(false, FakePage::default())
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true, FakePage::default())
    }

    pub fn with_page(page: FakePage) -> Arc<Self> {
        Self::build(false, page)
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Arc<dyn BrowserDriver>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("no chrome on this machine");
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBrowser {
            open: self.open.clone(),
            closed: AtomicBool::new(false),
            page: self.page.clone(),
            download_dir: Mutex::new(None),
            visited: self.visited.clone(),
        }))
    }
}

pub struct FakeBrowser {
    open: Arc<AtomicUsize>,
    closed: AtomicBool,
    page: FakePage,
    download_dir: Mutex<Option<PathBuf>>,
    visited: Arc<Mutex<Vec<String>>>,
}

impl FakeBrowser {
    fn shut(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("browser already closed");
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.ensure_open()?;
        if self.page.fail_navigation {
            anyhow::bail!("net::ERR_CONNECTION_RESET");
        }
        self.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.page.title.clone())
    }

    async fn page_source(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.page.html.clone())
    }

    async fn find_elements(&self, css_selector: &str) -> Result<Vec<ElementRef>> {
        self.ensure_open()?;
        Ok(self
            .page
            .elements
            .iter()
            .filter(|(selector, _)| *selector == css_selector)
            .map(|(_, id)| ElementRef(id.to_string()))
            .collect())
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.ensure_open()?;
        if let Some((id, file_name, size)) = self.page.download_on_click {
            if element.0 == id {
                if let Some(dir) = self.download_dir.lock().unwrap().clone() {
                    std::fs::write(dir.join(file_name), vec![0u8; size])?;
                }
            }
        }
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<()> {
        self.ensure_open()?;
        *self.download_dir.lock().unwrap() = Some(dir.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shut();
        Ok(())
    }

    fn abort(&self) {
        self.shut();
    }
}
