use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity rotation and pacing
    pub evasion: EvasionConfig,

    /// Where artifacts land
    pub storage: StorageConfig,

    /// Authoritative metadata service
    pub api: ApiConfig,

    /// Headless browser used for scraping and the relay strategy
    pub browser: BrowserConfig,

    /// External command-line tools
    pub tools: ToolsConfig,

    /// Application settings
    pub app: AppConfig,
}

/// Upper bound for either pacing bound
pub const MAX_DELAY_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvasionConfig {
    /// Pick a random proxy per identity
    pub proxy_rotation: bool,

    /// Pick a random user agent per identity
    pub user_agent_rotation: bool,

    /// One proxy address per line
    pub proxy_list_path: PathBuf,

    /// Free proxy list endpoint used when the list file is empty
    pub proxy_provider_url: String,

    /// Lower bound of the pacing delay, seconds
    pub delay_min_secs: f64,

    /// Upper bound of the pacing delay, seconds
    pub delay_max_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all artifacts
    pub download_root: PathBuf,

    /// Netscape cookies.txt exported from a logged-in browser
    pub cookie_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// YouTube Data API key; never written back to disk
    #[serde(skip_serializing)]
    pub youtube_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub chromedriver_path: String,
    pub headless: bool,
    pub launch_timeout_secs: u64,
    pub relay: RelayConfig,
}

/// Third-party conversion site driven by the browser relay strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Page URL prefix; the video identifier is appended
    pub base_url: String,

    /// Button requesting the conversion
    pub trigger_selector: String,

    /// Link that starts the actual download
    pub link_selector: String,

    /// How long to wait for each UI element
    pub ui_timeout_secs: u64,

    /// How long to poll the download directory
    pub download_wait_secs: u64,

    /// Files below this size are treated as incomplete
    pub min_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,

    /// Upper bound on a single external command
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Maximum concurrent acquisitions, each with its own session
    pub max_concurrent_jobs: usize,

    /// Default output format
    pub default_output_format: String,

    /// Draw progress bars for direct downloads
    pub show_progress: bool,
}

impl Default for EvasionConfig {
    fn default() -> Self {
        Self {
            proxy_rotation: true,
            user_agent_rotation: true,
            proxy_list_path: PathBuf::from("./proxies.txt"),
            proxy_provider_url: "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all".to_string(),
            delay_min_secs: 3.0,
            delay_max_secs: 10.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("./downloads"),
            cookie_file: None,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chromedriver_path: "chromedriver".to_string(),
            headless: true,
            launch_timeout_secs: 30,
            relay: RelayConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.y2mate.com/youtube/".to_string(),
            trigger_selector: ".btn-download".to_string(),
            link_selector: ".download-link a".to_string(),
            ui_timeout_secs: 15,
            download_wait_secs: 120,
            min_file_bytes: 1_000_000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            command_timeout_secs: 900,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            default_output_format: "text".to_string(),
            show_progress: true,
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the local file, the user config dir, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::discover(),
        };

        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                let content = fs_err::read_to_string(&path)
                    .context("Failed to read config file")?;
                serde_yaml::from_str::<Config>(&content)
                    .context("Failed to parse config file")?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the user config path
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::user_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(config_path)
    }

    fn discover() -> Option<PathBuf> {
        // Current directory first for easy testing
        let local_config = PathBuf::from("tubegrab.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        Self::user_config_path().ok().filter(|path| path.exists())
    }

    fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("tubegrab").join("config.yaml"))
    }

    /// Environment overrides recognized for compatibility with existing deployments
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("YOUTUBE_API_KEY").filter(|k| !k.is_empty()) {
            self.api.youtube_api_key = Some(key);
        }
        if let Some(path) = lookup("DOWNLOAD_PATH").filter(|p| !p.is_empty()) {
            self.storage.download_root = PathBuf::from(path);
        }
        if let Some(path) = lookup("PROXY_LIST_PATH").filter(|p| !p.is_empty()) {
            self.evasion.proxy_list_path = PathBuf::from(path);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let evasion = &self.evasion;

        for (name, value) in [
            ("delay_min_secs", evasion.delay_min_secs),
            ("delay_max_secs", evasion.delay_max_secs),
        ] {
            if !value.is_finite() || value > MAX_DELAY_SECS {
                anyhow::bail!("{} must be a number of seconds up to {}, got {}", name, MAX_DELAY_SECS, value);
            }
        }
        if evasion.delay_min_secs < 0.0 || evasion.delay_max_secs < 0.0 {
            anyhow::bail!("Pacing delays must not be negative");
        }
        if evasion.delay_min_secs > evasion.delay_max_secs {
            anyhow::bail!(
                "delay_min_secs ({}) must not exceed delay_max_secs ({})",
                evasion.delay_min_secs,
                evasion.delay_max_secs
            );
        }
        if self.app.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Download Root: {}", self.storage.download_root.display());
        if let Some(cookies) = &self.storage.cookie_file {
            println!("  Cookie File: {}", cookies.display());
        }
        println!(
            "  API Key: {}",
            if self.api.youtube_api_key.is_some() { "configured" } else { "not set" }
        );
        println!("  Proxy Rotation: {}", self.evasion.proxy_rotation);
        println!("  Proxy List: {}", self.evasion.proxy_list_path.display());
        println!("  User Agent Rotation: {}", self.evasion.user_agent_rotation);
        println!(
            "  Pacing Delay: {}-{}s",
            self.evasion.delay_min_secs, self.evasion.delay_max_secs
        );
        println!("  Relay: {}", self.browser.relay.base_url);
        println!("  Max Concurrent Jobs: {}", self.app.max_concurrent_jobs);
    }
}
