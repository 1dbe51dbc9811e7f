// W3C WebDriver client driving a chromedriver child process
//
// Every browser gets its own chromedriver on a free local port. On unix the
// driver leads its own process group, so killing the group also takes down
// the Chrome processes it started.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};

use super::browser::{BrowserDriver, BrowserLauncher, ElementRef, LaunchOptions};
use crate::config::BrowserConfig;
use crate::Result;

/// Key under which W3C element references are returned
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Launches Chrome through chromedriver
pub struct WebDriverLauncher {
    chromedriver_path: String,
    headless: bool,
    launch_timeout: Duration,
}

impl WebDriverLauncher {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            chromedriver_path: config.chromedriver_path.clone(),
            headless: config.headless,
            launch_timeout: Duration::from_secs(config.launch_timeout_secs),
        }
    }

    fn chrome_args(&self, options: &LaunchOptions) -> Vec<String> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-extensions".to_string(),
            "--disable-infobars".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--window-size=1920,1080".to_string(),
            format!("--user-agent={}", options.user_agent),
        ];

        if self.headless {
            args.push("--headless=new".to_string());
        }

        if let Some(proxy) = &options.proxy {
            args.push(format!("--proxy-server={}", proxy));
        }

        args
    }

    async fn wait_until_ready(client: &reqwest::Client, base: &str) -> Result<()> {
        loop {
            if let Ok(response) = client.get(format!("{}/status", base)).send().await {
                if let Ok(status) = response.json::<Value>().await {
                    if status["value"]["ready"].as_bool().unwrap_or(false) {
                        return Ok(());
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn BrowserDriver>> {
        let port = free_port()?;
        let base = format!("http://127.0.0.1:{}", port);

        tracing::debug!("Starting {} on port {}", self.chromedriver_path, port);

        let mut command = Command::new(&self.chromedriver_path);
        command
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = DriverProcess::spawn(command)
            .with_context(|| format!("Failed to start {}", self.chromedriver_path))?;

        // From here on the whole process group dies with `child`, so early
        // returns and a dropped launch leave nothing behind
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        tokio::time::timeout(self.launch_timeout, Self::wait_until_ready(&client, &base))
            .await
            .map_err(|_| anyhow::anyhow!("chromedriver not ready after {:?}", self.launch_timeout))??;

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": self.chrome_args(options),
                        "excludeSwitches": ["enable-automation"],
                        "useAutomationExtension": false
                    }
                }
            }
        });

        let created = send(client.post(format!("{}/session", base)).json(&capabilities)).await?;
        let session_id = created["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("chromedriver returned no session id"))?
            .to_string();

        let browser = WebDriverBrowser {
            client,
            session_url: format!("{}/session/{}", base, session_id),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = browser
            .cdp(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": options.startup_script }),
            )
            .await
        {
            if let Err(close_err) = browser.close().await {
                tracing::warn!("Error closing half-initialized browser: {:#}", close_err);
            }
            return Err(e.context("Failed to inject startup script"));
        }

        Ok(Arc::new(browser))
    }
}

/// One Chrome session behind its own chromedriver
pub struct WebDriverBrowser {
    client: reqwest::Client,
    session_url: String,
    child: Mutex<Option<DriverProcess>>,
    closed: AtomicBool,
}

impl WebDriverBrowser {
    async fn cdp(&self, cmd: &str, params: Value) -> Result<Value> {
        send(
            self.client
                .post(format!("{}/goog/cdp/execute", self.session_url))
                .json(&json!({ "cmd": cmd, "params": params })),
        )
        .await
    }

    fn take_child(&self) -> Option<DriverProcess> {
        self.child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        send(
            self.client
                .post(format!("{}/url", self.session_url))
                .json(&json!({ "url": url })),
        )
        .await?;
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        let value = send(self.client.get(format!("{}/title", self.session_url))).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&self) -> Result<String> {
        let value = send(self.client.get(format!("{}/source", self.session_url))).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_elements(&self, css_selector: &str) -> Result<Vec<ElementRef>> {
        let value = send(
            self.client
                .post(format!("{}/elements", self.session_url))
                .json(&json!({ "using": "css selector", "value": css_selector })),
        )
        .await?;

        Ok(value
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|e| e[ELEMENT_KEY].as_str())
                    .map(|id| ElementRef(id.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        send(
            self.client
                .post(format!("{}/element/{}/click", self.session_url, element.0))
                .json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<()> {
        self.cdp(
            "Browser.setDownloadBehavior",
            json!({ "behavior": "allow", "downloadPath": dir.to_string_lossy() }),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let deleted = self.client.delete(&self.session_url).send().await;

        if let Some(mut child) = self.take_child() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Error stopping chromedriver: {:#}", e);
            }
        }

        deleted?;
        Ok(())
    }

    fn abort(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.take_child() {
            child.start_kill();
        }
    }
}

/// chromedriver child that takes the browsers it started down with it
pub struct DriverProcess {
    child: Child,
}

impl DriverProcess {
    pub fn spawn(mut command: Command) -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.as_std_mut().process_group(0);
        }

        let child = command.kill_on_drop(true).spawn()?;
        Ok(Self { child })
    }

    /// Signal the process group without waiting
    pub fn start_kill(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            tracing::warn!("Error killing chromedriver: {}", e);
        }
    }

    /// Kill the process group and reap the driver
    pub async fn kill(&mut self) -> Result<()> {
        self.kill_group();
        self.child.kill().await?;
        Ok(())
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        let Some(pid) = self.child.id() else { return };
        let group = format!("-{}", pid);

        match std::process::Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::debug!("kill for process group {} exited with {}", pid, status),
            Err(e) => tracing::warn!("Could not signal process group {}: {}", pid, e),
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.kill_group();
    }
}

/// Send a WebDriver command and unwrap its `value`, surfacing driver errors
async fn send(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await.context("Invalid WebDriver response")?;
    let value = body["value"].clone();

    if !status.is_success() || value.get("error").is_some() {
        anyhow::bail!(
            "WebDriver error ({}): {} {}",
            status,
            value["error"].as_str().unwrap_or("unknown error"),
            value["message"].as_str().unwrap_or_default()
        );
    }

    Ok(value)
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
