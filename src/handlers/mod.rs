use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use log::{error, info};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{RejectReason, VoteOutcome};
use crate::models::QueueEntry;
use crate::party::Party;
use crate::spotify::{CatalogSearch, SpotifyClient};

pub struct AppState {
    pub party: Arc<Mutex<Party>>,
    pub spotify: Arc<SpotifyClient>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(submit_request))
        .route("/queue", get(queue_snapshot))
        .route("/start", get(start))
        .route("/stop", get(stop))
        .route("/autopilot", get(autopilot))
        .route("/resume", get(resume))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct VoteParams {
    listener: String,
    track: String,
    artist: Option<String>,
}

// Wire status codes, kept stable for existing clients: 202 accepted,
// 404 unknown track, 405 explicit, 406 over a share limit, 407 requests
// disabled.

/// The vote path: resolve the query against the catalog (outside the
/// lock), then run the admission check and the mutations it authorizes as
/// one atomic step.
async fn submit_request(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VoteParams>,
) -> StatusCode {
    {
        let party = state.party.lock().await;
        if !party.is_running() || !party.is_taking_requests() {
            return StatusCode::PROXY_AUTHENTICATION_REQUIRED;
        }
    }

    let found = match state
        .spotify
        .search_track(&params.track, params.artist.as_deref())
        .await
    {
        Ok(found) => found,
        Err(e) => {
            error!("Catalog search failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    let track = match found {
        Some(track) => track,
        None => {
            info!("No tracks found for: {}", params.track);
            return status_for(VoteOutcome::Rejected(RejectReason::NotFound));
        }
    };

    let outcome = state
        .party
        .lock()
        .await
        .submit_vote(&params.listener, track);
    status_for(outcome)
}

fn status_for(outcome: VoteOutcome) -> StatusCode {
    match outcome {
        VoteOutcome::Accepted => StatusCode::ACCEPTED,
        VoteOutcome::Rejected(RejectReason::NotFound) => StatusCode::NOT_FOUND,
        VoteOutcome::Rejected(RejectReason::Explicit) => StatusCode::METHOD_NOT_ALLOWED,
        VoteOutcome::Rejected(RejectReason::OverGlobalShare)
        | VoteOutcome::Rejected(RejectReason::OverTrackShare) => StatusCode::NOT_ACCEPTABLE,
    }
}

async fn queue_snapshot(State(state): State<Arc<AppState>>) -> Json<Vec<QueueEntry>> {
    Json(state.party.lock().await.queue_snapshot())
}

async fn start(State(state): State<Arc<AppState>>) -> StatusCode {
    info!("Received start signal; party-dj running");
    state.party.lock().await.set_running(true);
    StatusCode::ACCEPTED
}

async fn stop(State(state): State<Arc<AppState>>) -> StatusCode {
    info!("Received stop signal; party-dj stopped");
    state.party.lock().await.set_running(false);
    StatusCode::ACCEPTED
}

async fn autopilot(State(state): State<Arc<AppState>>) -> StatusCode {
    let mut party = state.party.lock().await;
    if party.is_running() {
        info!("Received autopilot signal; no longer accepting requests");
        party.set_taking_requests(false);
    }
    StatusCode::ACCEPTED
}

async fn resume(State(state): State<Arc<AppState>>) -> StatusCode {
    let mut party = state.party.lock().await;
    if party.is_running() {
        info!("Received autopilot disable signal; accepting requests");
        party.set_taking_requests(true);
    }
    StatusCode::ACCEPTED
}
