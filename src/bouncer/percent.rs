use super::{Bouncer, Decision};
use crate::error::RejectReason;
use crate::models::{Guest, Track};

pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_GRACE: u64 = 5;

/// The shipped admission policy: no guest may own more than `threshold` of
/// all accepted requests, nor more than `threshold` of any single track's
/// votes. A guest's first `grace` accepted requests are exempt from both
/// share checks so new arrivals are not shut out by a near-zero
/// denominator. Explicit-content blocking is independent of the shares and
/// applies inside the grace window too.
#[derive(Debug, Clone)]
pub struct PercentBouncer {
    threshold: f64,
    grace: u64,
    block_explicit: bool,
}

impl PercentBouncer {
    pub fn new(threshold: f64, grace: u64, block_explicit: bool) -> Self {
        Self {
            threshold,
            grace,
            block_explicit,
        }
    }
}

impl Bouncer for PercentBouncer {
    fn admit(&self, guest: &Guest, track: &Track, total_requests: u64) -> Decision {
        if guest.requests >= self.grace {
            // is the guest over the legal limit across the whole party?
            let global_share = guest.requests as f64 / total_requests.max(1) as f64;
            if global_share > self.threshold {
                return Decision::Refuse(RejectReason::OverGlobalShare);
            }

            // or over the limit for this particular track?
            let track_share =
                f64::from(track.votes_from(&guest.key)) / f64::from(track.votes().max(1));
            if track_share > self.threshold {
                return Decision::Refuse(RejectReason::OverTrackShare);
            }
        }

        if self.block_explicit && track.info.explicit {
            return Decision::Refuse(RejectReason::Explicit);
        }

        Decision::Admit
    }
}
