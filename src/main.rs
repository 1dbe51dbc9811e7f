use anyhow::Result;
use clap::Parser;
use console::style;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubegrab::acquire::{load_proxy_pool, AcquisitionOrchestrator, AcquisitionRequest, AcquisitionResult};
use tubegrab::cli::{build_request, Cli, Commands, OutputFormat};
use tubegrab::evasion::ProxyEntry;
use tubegrab::{output, utils, Config, VideoId};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Acquire {
            references,
            video,
            audio,
            transcript,
            all,
            output_root,
            cookies,
            no_proxy_rotation,
            no_ua_rotation,
            deadline,
            format,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;

            if let Some(root) = output_root {
                config.storage.download_root = root;
            }
            if let Some(cookies) = cookies {
                config.storage.cookie_file = Some(cookies);
            }
            if no_proxy_rotation {
                config.evasion.proxy_rotation = false;
            }
            if no_ua_rotation {
                config.evasion.user_agent_rotation = false;
            }
            if cli.quiet {
                config.app.show_progress = false;
            }

            let format = format.unwrap_or_else(|| OutputFormat::from_config(&config.app.default_output_format));
            let request = build_request(video, audio, transcript, all);

            // Missing tools only disable individual strategies
            let missing_deps = utils::check_dependencies(&config).await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - fallback strategies may still work)");
            }

            let cancel = cancellation(deadline);
            run_acquisitions(&config, references, request, format, cancel).await?;
        }
        Commands::Id { reference } => {
            let id = VideoId::parse(&reference)?;
            println!("{}", id);
        }
        Commands::Proxies => {
            let config = Config::load(cli.config.as_deref())?;
            let proxies = load_proxy_pool(&config).await;

            if proxies.is_empty() {
                println!("No proxies available; requests will use a direct connection");
            } else {
                println!("Loaded {} proxies:", proxies.len());
                for proxy in &proxies {
                    println!("  • {} ({})", proxy.url(), proxy.provenance);
                }
            }
        }
        Commands::Check => {
            let config = Config::load(cli.config.as_deref())?;
            let missing = utils::check_dependencies(&config).await;

            if missing.is_empty() {
                println!("{} yt-dlp, ffmpeg and chromedriver are available", style("✓").green());
            } else {
                println!("Missing tools:");
                for dep in &missing {
                    println!("  • {}", dep);
                }
            }
        }
        Commands::Config { show, init } => {
            let config = Config::load(cli.config.as_deref())?;

            if init {
                let path = Config::default().save()?;
                println!("Default configuration written to: {}", path.display());
            }
            if show || !init {
                config.display();
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "tubegrab=debug"
    } else if cli.quiet {
        "tubegrab=warn"
    } else {
        "tubegrab=info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so JSON results on stdout stay parseable
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Token cancelled by Ctrl-C or when the deadline elapses
fn cancellation(deadline: Option<u64>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, abandoning running acquisitions");
            on_interrupt.cancel();
        }
    });

    if let Some(secs) = deadline {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::warn!("Deadline of {}s elapsed, abandoning running acquisitions", secs);
            on_deadline.cancel();
        });
    }

    cancel
}

async fn run_acquisitions(
    config: &Config,
    references: Vec<String>,
    request: AcquisitionRequest,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<()> {
    let total = references.len();
    let proxies = Arc::new(load_proxy_pool(config).await);

    // One orchestrator, and so one session and browser, per reference
    let outcomes: Vec<(String, Result<AcquisitionResult>)> = stream::iter(references)
        .map(|reference| {
            let proxies = proxies.clone();
            let cancel = cancel.child_token();
            async move {
                let outcome = acquire_one(config, proxies, cancel, &reference, &request).await;
                (reference, outcome)
            }
        })
        .buffer_unordered(config.app.max_concurrent_jobs)
        .collect()
        .await;

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for (reference, outcome) in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => failures.push((reference, e)),
        }
    }

    if !results.is_empty() {
        output::print_to_console(&results, &format)?;
    }

    for (reference, e) in &failures {
        eprintln!("{} {}: {:#}", style("✗").red(), reference, e);
    }

    if !failures.is_empty() {
        anyhow::bail!("{} of {} requests failed", failures.len(), total);
    }
    Ok(())
}

async fn acquire_one(
    config: &Config,
    proxies: Arc<Vec<ProxyEntry>>,
    cancel: CancellationToken,
    reference: &str,
    request: &AcquisitionRequest,
) -> Result<AcquisitionResult> {
    let orchestrator = AcquisitionOrchestrator::from_config(config, proxies, cancel)?;
    Ok(orchestrator.acquire(reference, request).await?)
}
