use std::env;
use std::str::FromStr;

use crate::bouncer::percent::{DEFAULT_GRACE, DEFAULT_THRESHOLD};
use crate::error::ConfigError;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Runtime configuration, read once at startup from the environment
/// (`.env` files are honored via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Pre-acquired Spotify bearer token; acquiring and refreshing it is
    /// out of scope for this service.
    pub access_token: String,
    /// The live playlist the party host is listening to.
    pub playlist_id: String,
    /// Playlist to sample recommendation seeds from; defaults to the live
    /// playlist when unset.
    pub seed_playlist_id: Option<String>,
    pub block_explicit: bool,
    pub threshold: f64,
    pub grace: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            access_token: required("SPOTIFY_ACCESS_TOKEN")?,
            playlist_id: required("SPOTIFY_PLAYLIST_ID")?,
            seed_playlist_id: env::var("SPOTIFY_SEED_PLAYLIST_ID")
                .ok()
                .filter(|value| !value.is_empty()),
            block_explicit: parse_var("BLOCK_EXPLICIT", false)?,
            threshold: parse_var("REQUEST_THRESHOLD", DEFAULT_THRESHOLD)?,
            grace: parse_var("GRACE_REQUESTS", DEFAULT_GRACE)?,
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value }),
        Err(_) => Ok(default),
    }
}
