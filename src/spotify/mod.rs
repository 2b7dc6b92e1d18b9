//! Spotify Web API collaborators: catalog search, recommendation source
//! and the live-playlist playback sink.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::models::TrackInfo;

const API_BASE: &str = "https://api.spotify.com/v1";
const SEARCH_LIMIT: usize = 10;
const SEED_SAMPLE: usize = 5;
const PLAYLIST_PAGE_LIMIT: usize = 100;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Anything that keeps the DJ from talking to Spotify. The DJ's loop
/// treats every variant the same way: log, back off, try again.
#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("Spotify request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Spotify API error {0}: {1}")]
    Api(StatusCode, String),

    #[error("nothing is currently playing")]
    NoActivePlayback,

    #[error("playback context is not the designated playlist ({0})")]
    WrongPlaylist(String),
}

/// Resolves a human query to a concrete catalog track.
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    async fn search_track(
        &self,
        title: &str,
        artist: Option<&str>,
    ) -> Result<Option<TrackInfo>, SpotifyError>;
}

/// Supplies fallback candidates for when the request queue is empty.
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn recommend_tracks(&self) -> Result<Vec<TrackInfo>, SpotifyError>;
}

/// What is playing right now and how long it has left.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackPosition {
    pub track_id: String,
    pub remaining: Duration,
}

/// The live playlist the party host is listening to.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn append_to_playlist(&self, track_id: &str) -> Result<(), SpotifyError>;

    async fn remaining_playback(&self) -> Result<PlaybackPosition, SpotifyError>;

    /// Ids of the last `n` tracks of the live playlist.
    async fn playlist_tail(&self, n: usize) -> Result<Vec<String>, SpotifyError>;
}

// Wire models for the handful of endpoints we touch.

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    items: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: String,
    name: String,
    explicit: bool,
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

impl ApiTrack {
    fn into_info(self) -> TrackInfo {
        let artist = self
            .artists
            .first()
            .map(|artist| artist.name.clone())
            .unwrap_or_default();
        TrackInfo {
            id: self.id,
            name: self.name,
            artist,
            explicit: self.explicit,
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecommendationsResponse {
    tracks: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTracksResponse {
    items: Vec<PlaylistItem>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    // null for tracks that are no longer available
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    context: Option<PlayerContext>,
    item: Option<ApiTrack>,
    progress_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PlayerContext {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

/// Thin client over the Spotify Web API. The bearer token is handed in at
/// startup; acquiring and refreshing it is somebody else's job.
pub struct SpotifyClient {
    http: Client,
    token: String,
    playlist_id: String,
    seed_playlist_id: String,
}

impl SpotifyClient {
    pub fn new(
        token: String,
        playlist_id: String,
        seed_playlist_id: Option<String>,
    ) -> Result<Self, SpotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let seed_playlist_id = seed_playlist_id.unwrap_or_else(|| playlist_id.clone());
        Ok(Self {
            http,
            token,
            playlist_id,
            seed_playlist_id,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SpotifyError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpotifyError::Api(status, body));
        }
        Ok(response.json::<T>().await?)
    }

    fn tracks_url(&self, playlist_id: &str) -> String {
        format!("{}/playlists/{}/tracks", API_BASE, playlist_id)
    }
}

#[async_trait]
impl CatalogSearch for SpotifyClient {
    async fn search_track(
        &self,
        title: &str,
        artist: Option<&str>,
    ) -> Result<Option<TrackInfo>, SpotifyError> {
        let mut query = format!("track:{}", title);
        if let Some(artist) = artist {
            query.push_str(&format!(" artist:{}", artist));
        }

        let url = format!("{}/search", API_BASE);
        let limit = SEARCH_LIMIT.to_string();
        let response: SearchResponse = self
            .get_json(
                &url,
                &[
                    ("q", query.as_str()),
                    ("type", "track"),
                    ("limit", limit.as_str()),
                ],
            )
            .await?;

        Ok(response
            .tracks
            .items
            .into_iter()
            .next()
            .map(ApiTrack::into_info))
    }
}

#[async_trait]
impl RecommendationSource for SpotifyClient {
    /// Ask Spotify for recommendations seeded by a random sample of the
    /// seed playlist.
    async fn recommend_tracks(&self) -> Result<Vec<TrackInfo>, SpotifyError> {
        let limit = PLAYLIST_PAGE_LIMIT.to_string();
        let page: PlaylistTracksResponse = self
            .get_json(
                &self.tracks_url(&self.seed_playlist_id),
                &[("limit", limit.as_str())],
            )
            .await?;

        let pool: Vec<String> = page
            .items
            .into_iter()
            .filter_map(|item| item.track.map(|track| track.id))
            .collect();
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let seeds = {
            let mut rng = rand::thread_rng();
            pool.choose_multiple(&mut rng, SEED_SAMPLE)
                .cloned()
                .collect::<Vec<_>>()
        };

        let url = format!("{}/recommendations", API_BASE);
        let seed_tracks = seeds.join(",");
        let response: RecommendationsResponse = self
            .get_json(&url, &[("seed_tracks", seed_tracks.as_str())])
            .await?;

        Ok(response
            .tracks
            .into_iter()
            .map(ApiTrack::into_info)
            .collect())
    }
}

#[async_trait]
impl PlaybackSink for SpotifyClient {
    async fn append_to_playlist(&self, track_id: &str) -> Result<(), SpotifyError> {
        let body = serde_json::json!({
            "uris": [format!("spotify:track:{}", track_id)],
        });
        let response = self
            .http
            .post(self.tracks_url(&self.playlist_id))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpotifyError::Api(status, body));
        }
        Ok(())
    }

    async fn remaining_playback(&self) -> Result<PlaybackPosition, SpotifyError> {
        let url = format!("{}/me/player", API_BASE);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        // 204: the host has no active device
        if response.status() == StatusCode::NO_CONTENT {
            return Err(SpotifyError::NoActivePlayback);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpotifyError::Api(status, body));
        }

        let player: PlayerResponse = response.json().await?;
        let context = player.context.ok_or(SpotifyError::NoActivePlayback)?;
        let playlist_uri = format!("spotify:playlist:{}", self.playlist_id);
        if context.kind != "playlist" || context.uri != playlist_uri {
            return Err(SpotifyError::WrongPlaylist(context.uri));
        }

        let item = player.item.ok_or(SpotifyError::NoActivePlayback)?;
        let progress_ms = player.progress_ms.unwrap_or(0);
        let remaining_ms = item.duration_ms.saturating_sub(progress_ms);
        Ok(PlaybackPosition {
            track_id: item.id,
            remaining: Duration::from_millis(remaining_ms),
        })
    }

    async fn playlist_tail(&self, n: usize) -> Result<Vec<String>, SpotifyError> {
        // the playlist can be longer than one page: read the total first,
        // then fetch the final stretch
        let url = self.tracks_url(&self.playlist_id);
        let limit = n.to_string();
        let first: PlaylistTracksResponse = self
            .get_json(&url, &[("limit", limit.as_str()), ("offset", "0")])
            .await?;

        let page = if first.total > n {
            let offset = (first.total - n).to_string();
            self.get_json(&url, &[("limit", limit.as_str()), ("offset", offset.as_str())])
                .await?
        } else {
            first
        };

        Ok(page
            .items
            .into_iter()
            .filter_map(|item| item.track.map(|track| track.id))
            .collect())
    }
}
