use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::models::TrackInfo;
use crate::party::Party;
use crate::spotify::{PlaybackSink, RecommendationSource};

/// How many of the playlist's final tracks count as "about to run out".
const TRAILING_WINDOW: usize = 5;
/// Fixed backoff after a collaborator fault.
const FAULT_BACKOFF: Duration = Duration::from_secs(5);
/// Poll delay while the party has not been started.
const IDLE_POLL: Duration = Duration::from_secs(5);

/// The DJ's position in its selection/sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DjState {
    Idle,
    Selecting,
    Committing(TrackInfo),
    WaitingOnPlayback(Duration),
    RecoveringFromFault,
}

/// The single long-lived task that keeps the live playlist fed: it pops
/// the winning track (or falls back to recommendations), appends it to the
/// playlist, then sleeps until playback gets close to running out.
pub struct Dj<S> {
    party: Arc<Mutex<Party>>,
    spotify: Arc<S>,
    block_explicit: bool,
}

impl<S> Dj<S>
where
    S: RecommendationSource + PlaybackSink,
{
    pub fn new(party: Arc<Mutex<Party>>, spotify: Arc<S>, block_explicit: bool) -> Self {
        Self {
            party,
            spotify,
            block_explicit,
        }
    }

    /// Drive the state machine forever. All suspension happens here, on
    /// entry to the waiting states; `step` never sleeps, so the transition
    /// logic stays testable on its own.
    pub async fn run(self) {
        info!("DJ task started");
        let mut state = DjState::Idle;
        loop {
            match &state {
                DjState::WaitingOnPlayback(delay) => sleep(*delay).await,
                DjState::RecoveringFromFault => sleep(FAULT_BACKOFF).await,
                _ => {}
            }
            state = self.step(state).await;
        }
    }

    /// One transition of the selection/sync state machine.
    pub async fn step(&self, state: DjState) -> DjState {
        match state {
            DjState::Idle => DjState::Selecting,
            DjState::Selecting => self.select().await,
            DjState::Committing(track) => self.commit(track).await,
            DjState::WaitingOnPlayback(_) => self.check_playback().await,
            DjState::RecoveringFromFault => DjState::Selecting,
        }
    }

    /// Decide what plays next: the top of the request queue, or a
    /// recommendation when the queue is empty (or guests are on hold).
    async fn select(&self) -> DjState {
        let queued = {
            let mut party = self.party.lock().await;
            if !party.is_running() {
                return DjState::WaitingOnPlayback(IDLE_POLL);
            }
            if party.is_taking_requests() {
                party.next_from_queue()
            } else {
                // autopilot: play recommendations only
                None
            }
        };

        if let Some(track) = queued {
            info!(
                "Selected track from guest requests: {} - {}",
                track.artist, track.name
            );
            return DjState::Committing(track);
        }

        match self.spotify.recommend_tracks().await {
            Ok(tracks) => {
                let eligible: Vec<TrackInfo> = tracks
                    .into_iter()
                    .filter(|track| !(self.block_explicit && track.explicit))
                    .collect();
                let pick = {
                    let mut rng = rand::thread_rng();
                    eligible.choose(&mut rng).cloned()
                };
                match pick {
                    Some(track) => {
                        info!(
                            "Selected track from recommendations: {} - {}",
                            track.artist, track.name
                        );
                        DjState::Committing(track)
                    }
                    None => {
                        error!("Recommendation source returned no eligible tracks");
                        DjState::RecoveringFromFault
                    }
                }
            }
            Err(e) => {
                error!("Failed to fetch recommendations: {}", e);
                DjState::RecoveringFromFault
            }
        }
    }

    /// Append the chosen track to the live playlist and work out when to
    /// check on playback next.
    async fn commit(&self, track: TrackInfo) -> DjState {
        if let Err(e) = self.spotify.append_to_playlist(&track.id).await {
            error!("Failed to append track {} to the playlist: {}", track.id, e);
            return DjState::RecoveringFromFault;
        }
        info!("Added track to playlist: {} - {}", track.artist, track.name);

        match self.spotify.remaining_playback().await {
            Ok(position) => DjState::WaitingOnPlayback(next_wake(position.remaining)),
            Err(e) => {
                // the commit stands; fall back to the track's own length
                warn!(
                    "Could not read playback position after commit ({}); \
                     waiting out the track duration",
                    e
                );
                DjState::WaitingOnPlayback(next_wake(Duration::from_millis(track.duration_ms)))
            }
        }
    }

    /// Wake-up check: if the host is already inside the trailing window of
    /// the playlist, select again; otherwise keep waiting out the current
    /// track.
    async fn check_playback(&self) -> DjState {
        if !self.party.lock().await.is_running() {
            return DjState::WaitingOnPlayback(IDLE_POLL);
        }

        let position = match self.spotify.remaining_playback().await {
            Ok(position) => position,
            Err(e) => {
                error!("Failed to read playback position: {}", e);
                return DjState::RecoveringFromFault;
            }
        };
        let tail = match self.spotify.playlist_tail(TRAILING_WINDOW).await {
            Ok(tail) => tail,
            Err(e) => {
                error!("Failed to read the playlist tail: {}", e);
                return DjState::RecoveringFromFault;
            }
        };

        if tail.iter().any(|id| *id == position.track_id) {
            DjState::Selecting
        } else {
            info!(
                "Current track is not among the last {} in the playlist; \
                 sleeping for {:?}",
                TRAILING_WINDOW, position.remaining
            );
            DjState::WaitingOnPlayback(next_wake(position.remaining))
        }
    }
}

/// Never sleep zero: a track in its final moments must not spin the loop.
fn next_wake(remaining: Duration) -> Duration {
    remaining.max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bouncer::percent::PercentBouncer;
    use crate::spotify::{PlaybackPosition, SpotifyError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn info(id: &str, explicit: bool) -> TrackInfo {
        TrackInfo {
            id: id.to_string(),
            name: format!("Song {}", id),
            artist: "Artist".to_string(),
            explicit,
            duration_ms: 180_000,
        }
    }

    /// Scripted collaborator: every call pops the next canned response.
    #[derive(Default)]
    struct FakeSpotify {
        recommendations: StdMutex<VecDeque<Result<Vec<TrackInfo>, SpotifyError>>>,
        appends: StdMutex<VecDeque<Result<(), SpotifyError>>>,
        positions: StdMutex<VecDeque<Result<PlaybackPosition, SpotifyError>>>,
        tails: StdMutex<VecDeque<Result<Vec<String>, SpotifyError>>>,
        appended: StdMutex<Vec<String>>,
    }

    impl FakeSpotify {
        fn push_recommendations(&self, response: Result<Vec<TrackInfo>, SpotifyError>) {
            self.recommendations.lock().unwrap().push_back(response);
        }

        fn push_append(&self, response: Result<(), SpotifyError>) {
            self.appends.lock().unwrap().push_back(response);
        }

        fn push_position(&self, response: Result<PlaybackPosition, SpotifyError>) {
            self.positions.lock().unwrap().push_back(response);
        }

        fn push_tail(&self, response: Result<Vec<String>, SpotifyError>) {
            self.tails.lock().unwrap().push_back(response);
        }

        fn appended(&self) -> Vec<String> {
            self.appended.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecommendationSource for FakeSpotify {
        async fn recommend_tracks(&self) -> Result<Vec<TrackInfo>, SpotifyError> {
            self.recommendations
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted recommend_tracks call")
        }
    }

    #[async_trait]
    impl PlaybackSink for FakeSpotify {
        async fn append_to_playlist(&self, track_id: &str) -> Result<(), SpotifyError> {
            let response = self
                .appends
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted append_to_playlist call");
            if response.is_ok() {
                self.appended.lock().unwrap().push(track_id.to_string());
            }
            response
        }

        async fn remaining_playback(&self) -> Result<PlaybackPosition, SpotifyError> {
            self.positions
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted remaining_playback call")
        }

        async fn playlist_tail(&self, _n: usize) -> Result<Vec<String>, SpotifyError> {
            self.tails
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted playlist_tail call")
        }
    }

    fn running_party(grace: u64) -> Arc<Mutex<Party>> {
        let mut party = Party::new(Box::new(PercentBouncer::new(0.5, grace, false)));
        party.set_running(true);
        Arc::new(Mutex::new(party))
    }

    fn dj(party: Arc<Mutex<Party>>, spotify: Arc<FakeSpotify>, block_explicit: bool) -> Dj<FakeSpotify> {
        Dj::new(party, spotify, block_explicit)
    }

    #[tokio::test]
    async fn idle_moves_to_selecting() {
        let dj = dj(running_party(0), Arc::new(FakeSpotify::default()), false);
        assert_eq!(dj.step(DjState::Idle).await, DjState::Selecting);
    }

    #[tokio::test]
    async fn stopped_party_parks_the_dj() {
        let party = Arc::new(Mutex::new(Party::new(Box::new(PercentBouncer::new(
            0.5, 0, false,
        )))));
        let dj = dj(party, Arc::new(FakeSpotify::default()), false);

        assert_eq!(
            dj.step(DjState::Selecting).await,
            DjState::WaitingOnPlayback(IDLE_POLL)
        );
        assert_eq!(
            dj.step(DjState::WaitingOnPlayback(IDLE_POLL)).await,
            DjState::WaitingOnPlayback(IDLE_POLL)
        );
    }

    #[tokio::test]
    async fn selecting_pops_the_queue_and_returns_vote_weight() {
        let party = running_party(10);
        party.lock().await.submit_vote("alice", info("hit", false));
        let dj = dj(Arc::clone(&party), Arc::new(FakeSpotify::default()), false);

        let state = dj.step(DjState::Selecting).await;
        assert_eq!(state, DjState::Committing(info("hit", false)));
        // the committed track's ledger was cleared and the queue drained
        assert!(party.lock().await.queue_snapshot().is_empty());
    }

    #[tokio::test]
    async fn empty_queue_falls_back_to_recommendations() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_recommendations(Ok(vec![info("rec", false)]));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::Selecting).await,
            DjState::Committing(info("rec", false))
        );
    }

    #[tokio::test]
    async fn explicit_recommendations_are_filtered_out() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_recommendations(Ok(vec![info("dirty", true), info("clean", false)]));
        let dj = dj(running_party(0), Arc::clone(&spotify), true);

        assert_eq!(
            dj.step(DjState::Selecting).await,
            DjState::Committing(info("clean", false))
        );
    }

    #[tokio::test]
    async fn all_recommendations_filtered_means_recovery() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_recommendations(Ok(vec![info("dirty", true)]));
        let dj = dj(running_party(0), Arc::clone(&spotify), true);

        assert_eq!(
            dj.step(DjState::Selecting).await,
            DjState::RecoveringFromFault
        );
    }

    #[tokio::test]
    async fn recommendation_failure_recovers_then_reselects() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_recommendations(Err(SpotifyError::NoActivePlayback));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::Selecting).await,
            DjState::RecoveringFromFault
        );
        assert_eq!(
            dj.step(DjState::RecoveringFromFault).await,
            DjState::Selecting
        );
    }

    #[tokio::test]
    async fn autopilot_ignores_the_queue() {
        let party = running_party(10);
        {
            let mut party = party.lock().await;
            party.submit_vote("alice", info("queued", false));
            party.set_taking_requests(false);
        }
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_recommendations(Ok(vec![info("rec", false)]));
        let dj = dj(Arc::clone(&party), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::Selecting).await,
            DjState::Committing(info("rec", false))
        );
        // the guest request is still queued for when requests resume
        assert_eq!(party.lock().await.queue_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn commit_appends_and_waits_for_the_current_track() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_append(Ok(()));
        spotify.push_position(Ok(PlaybackPosition {
            track_id: "now-playing".to_string(),
            remaining: Duration::from_secs(30),
        }));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::Committing(info("hit", false))).await,
            DjState::WaitingOnPlayback(Duration::from_secs(30))
        );
        assert_eq!(spotify.appended(), vec!["hit".to_string()]);
    }

    #[tokio::test]
    async fn commit_failure_recovers() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_append(Err(SpotifyError::NoActivePlayback));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::Committing(info("hit", false))).await,
            DjState::RecoveringFromFault
        );
        assert!(spotify.appended().is_empty());
    }

    #[tokio::test]
    async fn position_poll_failure_after_commit_waits_out_the_duration() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_append(Ok(()));
        spotify.push_position(Err(SpotifyError::NoActivePlayback));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        // the append went through, so no re-selection: wait out the track
        assert_eq!(
            dj.step(DjState::Committing(info("hit", false))).await,
            DjState::WaitingOnPlayback(Duration::from_millis(180_000))
        );
    }

    #[tokio::test]
    async fn wake_inside_the_trailing_window_reselects() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_position(Ok(PlaybackPosition {
            track_id: "c".to_string(),
            remaining: Duration::from_secs(10),
        }));
        spotify.push_tail(Ok(vec!["a".into(), "b".into(), "c".into()]));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::WaitingOnPlayback(Duration::ZERO)).await,
            DjState::Selecting
        );
    }

    #[tokio::test]
    async fn wake_outside_the_window_resuspends_with_the_remaining_time() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_position(Ok(PlaybackPosition {
            track_id: "early".to_string(),
            remaining: Duration::from_secs(42),
        }));
        spotify.push_tail(Ok(vec!["x".into(), "y".into(), "z".into()]));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::WaitingOnPlayback(Duration::ZERO)).await,
            DjState::WaitingOnPlayback(Duration::from_secs(42))
        );
    }

    #[tokio::test]
    async fn wake_never_schedules_a_zero_sleep() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_position(Ok(PlaybackPosition {
            track_id: "ending".to_string(),
            remaining: Duration::ZERO,
        }));
        spotify.push_tail(Ok(vec!["other".into()]));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::WaitingOnPlayback(Duration::ZERO)).await,
            DjState::WaitingOnPlayback(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn playback_fault_while_waiting_recovers() {
        let spotify = Arc::new(FakeSpotify::default());
        spotify.push_position(Err(SpotifyError::WrongPlaylist(
            "spotify:album:other".to_string(),
        )));
        let dj = dj(running_party(0), Arc::clone(&spotify), false);

        assert_eq!(
            dj.step(DjState::WaitingOnPlayback(Duration::ZERO)).await,
            DjState::RecoveringFromFault
        );
    }
}
