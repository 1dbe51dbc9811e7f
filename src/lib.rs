//! tubegrab - resilient acquisition of YouTube metadata, transcripts, video and audio
//!
//! The library wraps an anti-detection session (rotating user agents and
//! proxies, randomized pacing, a single headless browser) around ordered
//! fallback chains for every artifact, and reports partial success with
//! itemized warnings instead of failing the whole request.

pub mod acquire;
pub mod cli;
pub mod config;
pub mod evasion;
pub mod identifier;
pub mod innertube;
pub mod media;
pub mod metadata;
pub mod output;
pub mod transcript;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use acquire::{
    AcquisitionOrchestrator, AcquisitionRequest, AcquisitionResult, AcquisitionWarning, Artifact,
};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use evasion::{EvasionIdentity, EvasionSession, ProxyEntry, ScopedBrowser};
pub use identifier::VideoId;
pub use media::{AttemptOutcome, MediaAcquirer, MediaKind, StrategyAttempt};
pub use metadata::{Metadata, MetadataResolver};
pub use transcript::{TranscriptEntry, TranscriptResolver};

/// Result type used for internal plumbing throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Result of an operation that fails with a request-level error
pub type AcquireResult<T> = std::result::Result<T, AcquireError>;

/// Request-level error taxonomy
#[derive(thiserror::Error, Debug, Clone)]
pub enum AcquireError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Metadata unavailable for {id}: {reason}")]
    MetadataUnavailable { id: String, reason: String },

    #[error("{}", media::describe_failure(.kind, .attempts, .hints))]
    AggregatedAcquisitionFailure {
        kind: MediaKind,
        attempts: Vec<StrategyAttempt>,
        hints: Vec<String>,
    },

    #[error("Browser unavailable: {0}")]
    EvasionUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Nothing could be acquired for {id}: {}", .warnings.join("; "))]
    RequestExhausted { id: String, warnings: Vec<String> },
}
