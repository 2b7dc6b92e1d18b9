mod bouncer;
mod config;
mod error;
mod handlers;
mod models;
mod party;
mod queue;
mod spotify;
mod tasks;

use std::sync::Arc;

use log::{error, info};
use tokio::sync::Mutex;

use bouncer::percent::PercentBouncer;
use config::Config;
use handlers::AppState;
use party::Party;
use spotify::SpotifyClient;
use tasks::dj::Dj;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return;
        }
    };

    let spotify = match SpotifyClient::new(
        config.access_token.clone(),
        config.playlist_id.clone(),
        config.seed_playlist_id.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build the Spotify client: {}", e);
            return;
        }
    };

    let bouncer = PercentBouncer::new(config.threshold, config.grace, config.block_explicit);
    let party = Arc::new(Mutex::new(Party::new(Box::new(bouncer))));

    // --- Start the DJ task ---
    let dj = Dj::new(
        Arc::clone(&party),
        Arc::clone(&spotify),
        config.block_explicit,
    );
    tokio::spawn(dj.run());
    // --- End DJ task ---

    let state = Arc::new(AppState { party, spotify });
    let app = handlers::router(state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };
    info!("party-dj listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}
