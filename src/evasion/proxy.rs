use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::PacingRange;
use crate::Result;

/// Number of single-proxy fetches attempted when no list is configured
pub const FETCH_ATTEMPTS: usize = 5;

/// Where a proxy address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProvenance {
    Configured,
    Fetched,
}

impl std::fmt::Display for ProxyProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyProvenance::Configured => write!(f, "configured"),
            ProxyProvenance::Fetched => write!(f, "fetched"),
        }
    }
}

/// One candidate egress address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub address: String,
    pub provenance: ProxyProvenance,
}

impl ProxyEntry {
    pub fn new(address: impl Into<String>, provenance: ProxyProvenance) -> Self {
        Self {
            address: address.into(),
            provenance,
        }
    }

    /// Proxy URL usable by HTTP clients, yt-dlp and the browser
    pub fn url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        }
    }
}

/// Source of free proxies, queried one address at a time
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Provider backed by a plain-text `host:port` list endpoint
pub struct FreeProxyProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl FreeProxyProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ProxyProvider for FreeProxyProvider {
    async fn fetch(&self) -> Result<String> {
        let response = self.client.get(&self.endpoint).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Proxy provider returned HTTP {}", response.status());
        }

        let body = response.text().await?;
        let candidates = parse_proxy_lines(&body);

        candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Proxy provider returned no addresses"))
    }
}

/// Pool of candidate egress addresses for one process run
pub struct ProxyPool {
    list_path: PathBuf,
    rotation: bool,
    provider: Arc<dyn ProxyProvider>,
    pacing: PacingRange,
}

impl ProxyPool {
    pub fn new(list_path: impl Into<PathBuf>, rotation: bool, provider: Arc<dyn ProxyProvider>) -> Self {
        Self {
            list_path: list_path.into(),
            rotation,
            provider,
            pacing: PacingRange::from_secs(0.0, 0.0),
        }
    }

    /// Delay drawn before each provider fetch after the first
    pub fn with_pacing(mut self, pacing: PacingRange) -> Self {
        self.pacing = pacing;
        self
    }

    /// Load the configured list, topping up from the free provider when it is empty.
    ///
    /// Never fails: an empty pool silently disables proxying.
    pub async fn load(&self) -> Vec<ProxyEntry> {
        let mut proxies: Vec<ProxyEntry> = match read_proxy_file(&self.list_path) {
            Ok(addresses) => addresses
                .into_iter()
                .map(|address| ProxyEntry::new(address, ProxyProvenance::Configured))
                .collect(),
            Err(e) => {
                tracing::error!("Failed to read proxy list {}: {:#}", self.list_path.display(), e);
                Vec::new()
            }
        };

        if proxies.is_empty() && self.rotation {
            let mut seen = HashSet::new();

            for attempt in 1..=FETCH_ATTEMPTS {
                if attempt > 1 {
                    tokio::time::sleep(self.pacing.sample()).await;
                }

                match self.provider.fetch().await {
                    Ok(address) if seen.insert(address.clone()) => {
                        proxies.push(ProxyEntry::new(address, ProxyProvenance::Fetched));
                    }
                    Ok(address) => {
                        tracing::debug!("Duplicate free proxy {} ignored", address);
                    }
                    Err(e) => {
                        tracing::warn!("Error getting free proxy (attempt {}): {:#}", attempt, e);
                    }
                }
            }
        }

        tracing::info!("Loaded {} proxies", proxies.len());
        proxies
    }
}

/// Read a proxy list file; a missing file is an empty list
fn read_proxy_file(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs_err::read_to_string(path)?;
    Ok(parse_proxy_lines(&content))
}

fn parse_proxy_lines(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        calls: AtomicUsize,
        responses: Vec<Option<&'static str>>,
    }

    #[async_trait]
    impl ProxyProvider for ScriptedProvider {
        async fn fetch(&self) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(call).copied().flatten() {
                Some(address) => Ok(address.to_string()),
                None => anyhow::bail!("provider down"),
            }
        }
    }

    fn provider(responses: Vec<Option<&'static str>>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            calls: AtomicUsize::new(0),
            responses,
        })
    }

    #[tokio::test]
    async fn test_configured_list_wins_over_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        fs_err::write(&path, "# office\n10.0.0.1:8080\n\n10.0.0.2:3128\n10.0.0.1:8080\n").unwrap();

        let provider = provider(vec![Some("1.1.1.1:80")]);
        let pool = ProxyPool::new(&path, true, provider.clone());
        let proxies = pool.load().await;

        assert_eq!(
            proxies,
            vec![
                ProxyEntry::new("10.0.0.1:8080", ProxyProvenance::Configured),
                ProxyEntry::new("10.0.0.2:3128", ProxyProvenance::Configured),
            ]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failures_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(vec![
            Some("1.1.1.1:80"),
            None,
            Some("2.2.2.2:80"),
            None,
            Some("1.1.1.1:80"),
        ]);
        let pool = ProxyPool::new(dir.path().join("missing.txt"), true, provider.clone());
        let proxies = pool.load().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), FETCH_ATTEMPTS);
        assert_eq!(proxies.len(), 2);
        assert!(proxies.iter().all(|p| p.provenance == ProxyProvenance::Fetched));
    }

    #[tokio::test]
    async fn test_provider_fetches_are_paced() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(vec![Some("1.1.1.1:80"), Some("2.2.2.2:80")]);
        let pool = ProxyPool::new(dir.path().join("missing.txt"), true, provider.clone())
            .with_pacing(PacingRange::from_secs(0.02, 0.03));

        let started = std::time::Instant::now();
        let proxies = pool.load().await;

        assert_eq!(proxies.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), FETCH_ATTEMPTS);
        assert!(started.elapsed() >= Duration::from_millis(20) * (FETCH_ATTEMPTS as u32 - 1));
    }

    #[tokio::test]
    async fn test_rotation_disabled_never_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(vec![Some("1.1.1.1:80")]);
        let pool = ProxyPool::new(dir.path().join("missing.txt"), false, provider.clone());

        assert!(pool.load().await.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_proxy_url_normalization() {
        assert_eq!(
            ProxyEntry::new("10.0.0.1:8080", ProxyProvenance::Configured).url(),
            "http://10.0.0.1:8080"
        );
        assert_eq!(
            ProxyEntry::new("socks5://10.0.0.1:1080", ProxyProvenance::Configured).url(),
            "socks5://10.0.0.1:1080"
        );
    }
}
