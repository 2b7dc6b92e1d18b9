pub mod percent;

use crate::error::RejectReason;
use crate::models::{Guest, Track};

/// Decision handed back by an admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Refuse(RejectReason),
}

/// A pluggable admission policy: decides whether a guest's vote for a track
/// is accepted, before any state is mutated.
///
/// `total_requests` is the number of requests accepted so far across all
/// guests, and the track's ledger does not yet include the vote under
/// consideration (pre-vote denominators).
pub trait Bouncer: Send + Sync {
    fn admit(&self, guest: &Guest, track: &Track, total_requests: u64) -> Decision;
}
