//! Moderation API Endpoints
//!
//! Message evaluation for the platform listener, plus the admin surface
//! moderators use for strikes, immunity and the whitelist.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::{CommunityStats, Decision, IncomingMessage, ModerationEngine};
use crate::error::{ModerationError, ModerationResult};
use crate::reputation::{
    ImmunityStatus, LeaderboardEntry, MemberKey, PointsAward, StrikeStatus, WeeklyAward,
};
use crate::whitelist::{WhitelistChange, WhitelistEntry};

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;
/// Longest relative whitelist grant (ten years)
const MAX_WHITELIST_HOURS: u32 = 24 * 365 * 10;

/// API state for moderation endpoints
#[derive(Clone)]
pub struct ModerationApiState {
    pub engine: Arc<ModerationEngine>,
}

impl ModerationApiState {
    pub fn new(engine: Arc<ModerationEngine>) -> Self {
        Self { engine }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn error_response(err: ModerationError) -> (StatusCode, String) {
    match err {
        ModerationError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        ModerationError::LedgerUnavailable(msg) => {
            error!(error = %msg, "Ledger unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "ledger unavailable".to_string())
        }
        ModerationError::Config(msg) => {
            error!(error = %msg, "Configuration error at request time");
            (StatusCode::INTERNAL_SERVER_ERROR, "configuration error".to_string())
        }
    }
}

fn member(community_id: &str, user_id: &str) -> Result<MemberKey, (StatusCode, String)> {
    MemberKey::new(community_id, user_id).map_err(error_response)
}

// Request/response types

#[derive(Debug, Deserialize)]
pub struct AwardRequest {
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhitelistRequest {
    pub granted_by: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Absolute expiry; takes precedence over `duration_hours`
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_hours: Option<u32>,
}

impl WhitelistRequest {
    fn expiry(&self, now: DateTime<Utc>) -> ModerationResult<Option<DateTime<Utc>>> {
        if self.expires_at.is_some() {
            return Ok(self.expires_at);
        }
        let Some(hours) = self.duration_hours else {
            return Ok(None);
        };
        if hours > MAX_WHITELIST_HOURS {
            return Err(ModerationError::Validation(format!(
                "duration_hours must be at most {MAX_WHITELIST_HOURS}"
            )));
        }
        now.checked_add_signed(Duration::hours(i64::from(hours)))
            .map(Some)
            .ok_or_else(|| ModerationError::Validation("whitelist expiry out of range".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ClearStrikesResponse {
    pub community_id: String,
    pub user_id: String,
    pub cleared: u32,
}

#[derive(Debug, Serialize)]
pub struct WeeklyBonusResponse {
    pub community_id: String,
    pub awarded_users: usize,
    pub awards: Vec<WeeklyAward>,
}

#[derive(Debug, Serialize)]
pub struct WhitelistListResponse {
    pub community_id: String,
    pub total: usize,
    pub entries: Vec<WhitelistEntry>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: u64,
}

// Endpoints

/// POST /evaluate - Decide on one message
pub async fn evaluate_message(
    State(state): State<ModerationApiState>,
    Json(message): Json<IncomingMessage>,
) -> ApiResult<Decision> {
    state
        .engine
        .evaluate(&message, Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /{community}/strikes/{user}
pub async fn get_strikes(
    State(state): State<ModerationApiState>,
    Path((community_id, user_id)): Path<(String, String)>,
) -> ApiResult<StrikeStatus> {
    let key = member(&community_id, &user_id)?;
    state
        .engine
        .strike_status(&key, Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

/// DELETE /{community}/strikes/{user} - Forgive active strikes, points untouched
pub async fn clear_strikes(
    State(state): State<ModerationApiState>,
    Path((community_id, user_id)): Path<(String, String)>,
) -> ApiResult<ClearStrikesResponse> {
    let key = member(&community_id, &user_id)?;
    let cleared = state
        .engine
        .clear_strikes(&key, Utc::now())
        .await
        .map_err(error_response)?;

    info!(member = %key, cleared, "Strikes cleared by admin");

    Ok(Json(ClearStrikesResponse {
        community_id,
        user_id,
        cleared,
    }))
}

/// GET /{community}/immunity/{user}
pub async fn get_immunity(
    State(state): State<ModerationApiState>,
    Path((community_id, user_id)): Path<(String, String)>,
) -> ApiResult<ImmunityStatus> {
    let key = member(&community_id, &user_id)?;
    state
        .engine
        .immunity_status(&key, Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /{community}/immunity/{user}/award - Manual grant, bypasses the throttle
pub async fn award_points(
    State(state): State<ModerationApiState>,
    Path((community_id, user_id)): Path<(String, String)>,
    Json(payload): Json<AwardRequest>,
) -> ApiResult<PointsAward> {
    let key = member(&community_id, &user_id)?;
    state
        .engine
        .grant_points(&key, payload.amount, Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /{community}/weekly-bonus
pub async fn weekly_bonus(
    State(state): State<ModerationApiState>,
    Path(community_id): Path<String>,
) -> ApiResult<WeeklyBonusResponse> {
    let awards = state
        .engine
        .award_weekly_bonus(&community_id, Utc::now())
        .await
        .map_err(error_response)?;

    Ok(Json(WeeklyBonusResponse {
        community_id,
        awarded_users: awards.len(),
        awards,
    }))
}

/// GET /{community}/leaderboard?limit=N
pub async fn leaderboard(
    State(state): State<ModerationApiState>,
    Path(community_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    state
        .engine
        .leaderboard(&community_id, limit)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /{community}/stats
pub async fn community_stats(
    State(state): State<ModerationApiState>,
    Path(community_id): Path<String>,
) -> ApiResult<CommunityStats> {
    state
        .engine
        .community_stats(&community_id, Utc::now())
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /{community}/whitelist - Active entries only
pub async fn list_whitelist(
    State(state): State<ModerationApiState>,
    Path(community_id): Path<String>,
) -> ApiResult<WhitelistListResponse> {
    let entries = state
        .engine
        .whitelist_list(&community_id, Utc::now())
        .await
        .map_err(error_response)?;

    Ok(Json(WhitelistListResponse {
        community_id,
        total: entries.len(),
        entries,
    }))
}

/// PUT /{community}/whitelist/{user}
pub async fn add_whitelist(
    State(state): State<ModerationApiState>,
    Path((community_id, user_id)): Path<(String, String)>,
    Json(payload): Json<WhitelistRequest>,
) -> Result<(StatusCode, Json<WhitelistChange>), (StatusCode, String)> {
    let key = member(&community_id, &user_id)?;
    let now = Utc::now();
    let expires_at = payload.expiry(now).map_err(error_response)?;
    let change = state
        .engine
        .whitelist_add(&key, payload.reason.clone(), &payload.granted_by, expires_at, now)
        .await
        .map_err(error_response)?;

    let status = if change.inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(change)))
}

/// DELETE /{community}/whitelist/{user}
pub async fn remove_whitelist(
    State(state): State<ModerationApiState>,
    Path((community_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let key = member(&community_id, &user_id)?;
    let removed = state
        .engine
        .whitelist_remove(&key)
        .await
        .map_err(error_response)?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("{key} is not whitelisted")))
    }
}

/// POST /cleanup - Drop strike records idle past the grace period
pub async fn cleanup(State(state): State<ModerationApiState>) -> ApiResult<CleanupResponse> {
    let removed = state
        .engine
        .cleanup_expired(Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(CleanupResponse { removed }))
}

/// Create the moderation router
pub fn create_router(state: ModerationApiState) -> Router {
    Router::new()
        .route("/evaluate", post(evaluate_message))
        .route("/cleanup", post(cleanup))
        .route("/{community_id}/strikes/{user_id}", get(get_strikes).delete(clear_strikes))
        .route("/{community_id}/immunity/{user_id}", get(get_immunity))
        .route("/{community_id}/immunity/{user_id}/award", post(award_points))
        .route("/{community_id}/weekly-bonus", post(weekly_bonus))
        .route("/{community_id}/leaderboard", get(leaderboard))
        .route("/{community_id}/stats", get(community_stats))
        .route("/{community_id}/whitelist", get(list_whitelist))
        .route(
            "/{community_id}/whitelist/{user_id}",
            put(add_whitelist).delete(remove_whitelist),
        )
        .with_state(state)
}
