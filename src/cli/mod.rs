use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::acquire::AcquisitionRequest;

#[derive(Parser)]
#[command(
    name = "tubegrab",
    about = "Resilient acquisition of YouTube metadata, transcripts, video and audio",
    version,
    long_about = "Fetches metadata, transcripts, video and audio for YouTube videos. Every artifact has an ordered chain of fallback strategies; requests run behind rotating user agents and proxies with randomized pacing, and partial results are reported with itemized warnings."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./tubegrab.yaml, then the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Acquire artifacts for one or more videos (metadata and transcript unless told otherwise)
    Acquire {
        /// Watch, shorts, live or youtu.be URLs, or bare video ids
        #[arg(value_name = "REFERENCE", required = true)]
        references: Vec<String>,

        /// Download the video
        #[arg(long)]
        video: bool,

        /// Download the audio as mp3
        #[arg(long)]
        audio: bool,

        /// Fetch the transcript
        #[arg(long)]
        transcript: bool,

        /// Video, audio and transcript
        #[arg(long, conflicts_with_all = ["video", "audio", "transcript"])]
        all: bool,

        /// Root directory for all artifacts
        #[arg(short, long, value_name = "DIR")]
        output_root: Option<PathBuf>,

        /// cookies.txt exported from a logged-in browser
        #[arg(long, value_name = "FILE")]
        cookies: Option<PathBuf>,

        /// Never route requests through a proxy
        #[arg(long)]
        no_proxy_rotation: bool,

        /// Always present the default user agent
        #[arg(long)]
        no_ua_rotation: bool,

        /// Abandon everything still running after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Print the canonical video id for a reference
    Id {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },

    /// Load the proxy pool and list it
    Proxies,

    /// Check that the external tools are installed
    Check,

    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration to the user config path
        #[arg(long)]
        init: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Serialized acquisition result
    Json,
}

impl OutputFormat {
    /// Parse the configured default, falling back to text
    pub fn from_config(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Artifact selection from the `acquire` flags
pub fn build_request(video: bool, audio: bool, transcript: bool, all: bool) -> AcquisitionRequest {
    if all {
        return AcquisitionRequest::all();
    }
    if !video && !audio && !transcript {
        return AcquisitionRequest::default();
    }
    AcquisitionRequest {
        video,
        audio,
        transcript,
    }
}
