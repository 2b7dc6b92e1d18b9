use std::collections::HashMap;

use log::{error, info, warn};

use crate::bouncer::{Bouncer, Decision};
use crate::models::{Guest, QueueEntry, Track, TrackInfo};
use crate::error::VoteOutcome;
use crate::queue::TrackQueue;

/// Everything a good party needs: the guest registry, the tracks guests
/// are voting on, and the queue of what plays next.
///
/// One instance lives behind an `Arc<Mutex<..>>` shared by the request
/// handlers and the DJ task. Every mutation happens inside a `&mut self`
/// method, so the admission check and the state updates it authorizes are
/// atomic per request.
pub struct Party {
    guests: HashMap<String, Guest>,
    tracks: HashMap<String, Track>,
    queue: TrackQueue,
    total_requests: u64,
    next_seq: u64,
    bouncer: Box<dyn Bouncer>,
    running: bool,
    taking_requests: bool,
}

impl Party {
    pub fn new(bouncer: Box<dyn Bouncer>) -> Self {
        Self {
            guests: HashMap::new(),
            tracks: HashMap::new(),
            queue: TrackQueue::new(),
            total_requests: 0,
            next_seq: 0,
            bouncer,
            running: false,
            taking_requests: true,
        }
    }

    /// Register a vote for a catalog-resolved track.
    ///
    /// On admission the ledger, the registry counters and the queue are
    /// updated together, in that order; an admitted vote is never rolled
    /// back.
    pub fn submit_vote(&mut self, guest_key: &str, info: TrackInfo) -> VoteOutcome {
        if !self.guests.contains_key(guest_key) {
            info!("New guest: {}", guest_key);
            self.guests
                .insert(guest_key.to_string(), Guest::new(guest_key));
        }

        let track_id = info.id.clone();
        if !self.tracks.contains_key(&track_id) {
            self.next_seq += 1;
            self.tracks
                .insert(track_id.clone(), Track::new(info, self.next_seq));
        }

        let guest = &self.guests[guest_key];
        let track = &self.tracks[&track_id];
        match self.bouncer.admit(guest, track, self.total_requests) {
            Decision::Refuse(reason) => {
                // a candidate nobody managed to vote for yet goes back out
                if self.tracks.get(&track_id).map_or(false, |t| t.votes() == 0) {
                    self.tracks.remove(&track_id);
                }
                warn!(
                    "Vote by {} for track {} refused: {:?}",
                    guest_key, track_id, reason
                );
                VoteOutcome::Rejected(reason)
            }
            Decision::Admit => {
                if let Some(track) = self.tracks.get_mut(&track_id) {
                    track.vote(guest_key);
                }
                if let Some(guest) = self.guests.get_mut(guest_key) {
                    guest.requests += 1;
                }
                self.total_requests += 1;

                let track = &self.tracks[&track_id];
                self.queue.enqueue_or_bump(track);
                info!(
                    "Guest {} voted for track {} ({} votes)",
                    guest_key,
                    track_id,
                    track.votes()
                );
                VoteOutcome::Accepted
            }
        }
    }

    /// Pop the winning track, clear its ledger, and give every voter their
    /// vote weight back. Returns the metadata for the playback sink, or
    /// `None` when nothing is queued.
    pub fn next_from_queue(&mut self) -> Option<TrackInfo> {
        let track_id = self.queue.pop_next().ok()?;
        let mut track = match self.tracks.remove(&track_id) {
            Some(track) => track,
            None => {
                error!("Queued track {} missing from the track table", track_id);
                return None;
            }
        };

        for (guest_key, votes) in track.clear() {
            let votes = u64::from(votes);
            match self.guests.get_mut(&guest_key) {
                Some(guest) if guest.requests >= votes => guest.requests -= votes,
                Some(guest) => {
                    error!(
                        "Guest {} request count {} below returned votes {}",
                        guest_key, guest.requests, votes
                    );
                    guest.requests = 0;
                }
                None => error!(
                    "Voter {} for track {} missing from the guest registry",
                    guest_key, track_id
                ),
            }
            self.total_requests = self.total_requests.saturating_sub(votes);
        }

        Some(track.info)
    }

    /// Tracks currently queued, in play order.
    pub fn queue_snapshot(&self) -> Vec<QueueEntry> {
        let mut queued: Vec<&Track> = self
            .tracks
            .values()
            .filter(|track| self.queue.contains(&track.info.id))
            .collect();
        queued.sort_by(|a, b| {
            b.votes()
                .cmp(&a.votes())
                .then_with(|| a.created_seq().cmp(&b.created_seq()))
                .then_with(|| a.info.id.cmp(&b.info.id))
        });
        queued
            .into_iter()
            .map(|track| QueueEntry {
                track_id: track.info.id.clone(),
                name: track.info.name.clone(),
                artist: track.info.artist.clone(),
                votes: track.votes(),
                first_requested: track.first_requested,
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_taking_requests(&self) -> bool {
        self.taking_requests
    }

    pub fn set_taking_requests(&mut self, taking_requests: bool) {
        self.taking_requests = taking_requests;
    }
}
