use thiserror::Error;

/// Why a vote request was declined. A declined request is an expected,
/// user-facing outcome, not an engineering failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The guest already owns more than the allowed share of all accepted
    /// requests.
    OverGlobalShare,
    /// The guest already owns more than the allowed share of this track's
    /// votes.
    OverTrackShare,
    /// Explicit-content blocking is on and the track is flagged explicit.
    Explicit,
    /// The catalog search found no matching track.
    NotFound,
}

/// Result of submitting a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("selection queue is empty")]
pub struct EmptyQueue;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}
