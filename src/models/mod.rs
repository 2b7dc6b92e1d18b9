use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A party guest, created the first time they request a track. Guests are
/// never removed; the request counter only goes down when a track they
/// voted for is committed to playback and its ledger is cleared.
#[derive(Debug, Clone)]
pub struct Guest {
    pub key: String,
    pub requests: u64,
}

impl Guest {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            requests: 0,
        }
    }
}

/// Catalog-resolved track metadata, as returned by the search and
/// recommendation collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub explicit: bool,
    pub duration_ms: u64,
}

/// A track guests are voting on: catalog metadata plus the vote ledger.
///
/// Invariant: `votes` always equals the sum of the ledger values, and every
/// ledger entry is at least 1 (zero-vote entries are removed, not kept).
#[derive(Debug, Clone)]
pub struct Track {
    pub info: TrackInfo,
    /// guest key -> votes cast by that guest
    requests: HashMap<String, u32>,
    votes: u32,
    /// creation sequence number; older tracks win vote ties
    created_seq: u64,
    pub first_requested: DateTime<Utc>,
}

impl Track {
    pub fn new(info: TrackInfo, created_seq: u64) -> Self {
        Self {
            info,
            requests: HashMap::new(),
            votes: 0,
            created_seq,
            first_requested: Utc::now(),
        }
    }

    /// Register one vote from the given guest.
    pub fn vote(&mut self, guest_key: &str) {
        let count = self.requests.entry(guest_key.to_string()).or_insert(0);
        *count += 1;
        self.votes += 1;
    }

    pub fn votes(&self) -> u32 {
        self.votes
    }

    /// Votes this guest has cast for this track.
    pub fn votes_from(&self, guest_key: &str) -> u32 {
        self.requests.get(guest_key).copied().unwrap_or(0)
    }

    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    /// Empty the ledger and hand back the per-guest vote counts so the
    /// registry can return each voter's weight.
    pub fn clear(&mut self) -> HashMap<String, u32> {
        let sum: u32 = self.requests.values().sum();
        if sum != self.votes {
            error!(
                "Vote ledger for {} out of sync: sum {} != total {}",
                self.info.id, sum, self.votes
            );
        }
        self.votes = 0;
        std::mem::take(&mut self.requests)
    }
}

/// One row of the queue snapshot exposed for observability.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub track_id: String,
    pub name: String,
    pub artist: String,
    pub votes: u32,
    pub first_requested: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> TrackInfo {
        TrackInfo {
            id: id.to_string(),
            name: format!("Song {}", id),
            artist: "Artist".to_string(),
            explicit: false,
            duration_ms: 180_000,
        }
    }

    #[test]
    fn votes_accumulate_per_guest() {
        let mut track = Track::new(info("a"), 1);
        track.vote("alice");
        track.vote("alice");
        track.vote("bob");

        assert_eq!(track.votes(), 3);
        assert_eq!(track.votes_from("alice"), 2);
        assert_eq!(track.votes_from("bob"), 1);
        assert_eq!(track.votes_from("carol"), 0);
    }

    #[test]
    fn clear_returns_the_ledger_and_resets_totals() {
        let mut track = Track::new(info("a"), 1);
        track.vote("alice");
        track.vote("alice");
        track.vote("bob");

        let ledger = track.clear();
        assert_eq!(ledger.get("alice"), Some(&2));
        assert_eq!(ledger.get("bob"), Some(&1));
        assert_eq!(track.votes(), 0);
        assert_eq!(track.votes_from("alice"), 0);

        // a cleared track starts a fresh voting round
        track.vote("carol");
        assert_eq!(track.votes(), 1);
    }
}
