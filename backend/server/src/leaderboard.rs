//! # Leaderboards
//!
//! Top ten per college and period, rebuilt wholesale on every computation.
//!
//! ## Periods
//!
//! - `weekly`: active ratings created in the last seven days, grouped by target
//! - `all_time`: the running stats stored on each user
//!
//! ## Qualifying
//!
//! - Verified member of the college
//! - At least [`MIN_RATINGS`] ratings in the period
//!
//! Ranked by average (desc), then rating count (desc), then user id so ties
//! are stable between runs.
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    Json,
    extract::{Query, State as AxumState},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    auth::{AdminUser, CurrentUser},
    cache::keys,
    error::{AppError, StorageError},
    models::{LeaderboardEntry, PeriodType, Rating, RatingStatus, User, round2},
    state::State,
};

pub const MIN_RATINGS: u32 = 5;
pub const BOARD_SIZE: usize = 10;
const WEEK: i64 = 7;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Standing {
    pub user_id: Uuid,
    pub average: f64,
    pub total: u32,
}

fn by_rank(a: &Standing, b: &Standing) -> Ordering {
    b.average
        .total_cmp(&a.average)
        .then_with(|| b.total.cmp(&a.total))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

fn top(mut standings: Vec<Standing>) -> Vec<Standing> {
    standings.retain(|standing| standing.total >= MIN_RATINGS);
    standings.sort_by(by_rank);
    standings.truncate(BOARD_SIZE);
    standings
}

/// Aggregates active ratings per target, keeping only `eligible` users.
pub fn weekly_standings(ratings: &[Rating], eligible: &HashSet<Uuid>) -> Vec<Standing> {
    let mut sums: HashMap<Uuid, (u64, u32)> = HashMap::new();

    for rating in ratings
        .iter()
        .filter(|rating| rating.status == RatingStatus::Active)
        .filter(|rating| eligible.contains(&rating.target_user_id))
    {
        let entry = sums.entry(rating.target_user_id).or_default();
        entry.0 += u64::from(rating.score);
        entry.1 += 1;
    }

    top(sums
        .into_iter()
        .map(|(user_id, (sum, total))| Standing {
            user_id,
            average: round2(sum as f64 / f64::from(total)),
            total,
        })
        .collect())
}

pub fn all_time_standings<'a>(users: impl IntoIterator<Item = &'a User>) -> Vec<Standing> {
    top(users
        .into_iter()
        .filter_map(|user| {
            Some(Standing {
                user_id: user.id,
                average: user.average_score?,
                total: user.ratings_received,
            })
        })
        .collect())
}

pub fn build_entries(
    college_id: Uuid,
    period: PeriodType,
    standings: &[Standing],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Vec<LeaderboardEntry> {
    standings
        .iter()
        .zip(1..)
        .map(|(standing, rank)| LeaderboardEntry {
            id: Uuid::new_v4(),
            college_id,
            user_id: standing.user_id,
            rank,
            average_score: standing.average,
            total_ratings: standing.total,
            period_start,
            period_end,
            period_type: period,
            created_at: period_end,
            user: None,
        })
        .collect()
}

/// Rebuilds both boards of a college and drops their cached copies.
pub async fn compute_leaderboard(state: &State, college_id: Uuid) -> Result<(), StorageError> {
    let now = Utc::now();
    let week_start = now - Duration::days(WEEK);

    let members: Vec<User> = state
        .store
        .college_users(college_id)
        .await?
        .into_iter()
        .filter(User::is_verified)
        .collect();
    let eligible: HashSet<Uuid> = members.iter().map(|user| user.id).collect();

    let recent = state.store.college_ratings_since(college_id, week_start).await?;

    let boards = [
        (
            PeriodType::Weekly,
            weekly_standings(&recent, &eligible),
            week_start,
        ),
        (
            PeriodType::AllTime,
            all_time_standings(&members),
            DateTime::<Utc>::UNIX_EPOCH,
        ),
    ];

    for (period, standings, start) in boards {
        let entries = build_entries(college_id, period, &standings, start, now);
        let size = entries.len();

        state
            .store
            .replace_leaderboard(college_id, period, entries)
            .await?;
        state.leaderboards.delete(&keys::leaderboard(college_id, period));

        info!(%college_id, %period, size, "Leaderboard computed");
    }

    Ok(())
}

/// Stored board with each entry's current public profile, served from cache
/// when fresh.
pub async fn load_leaderboard(
    state: &State,
    college_id: Uuid,
    period: PeriodType,
) -> Result<Vec<LeaderboardEntry>, StorageError> {
    let key = keys::leaderboard(college_id, period);
    if let Some(entries) = state.leaderboards.get(&key) {
        return Ok(entries);
    }
    let generation = state.leaderboards.generation(&key);

    let mut entries = state.store.get_leaderboard(college_id, period).await?;
    entries.sort_by_key(|entry| entry.rank);
    entries.truncate(BOARD_SIZE);

    for entry in &mut entries {
        entry.user = state
            .store
            .get_user(entry.user_id)
            .await?
            .map(|user| user.public());
    }

    if !state.leaderboards.set_if_current(key, entries.clone(), generation) {
        debug!(%college_id, %period, "Board recomputed during load, not caching");
    }

    Ok(entries)
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    period: Option<String>,
}

pub async fn get_leaderboard(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let period = match query.period.as_deref() {
        None => PeriodType::Weekly,
        Some(raw) => PeriodType::parse(raw)
            .ok_or_else(|| AppError::bad_request("Period must be weekly or all_time"))?,
    };

    let college_id = user
        .college_id
        .ok_or_else(|| AppError::bad_request("Please complete your profile first"))?;

    Ok(Json(load_leaderboard(&state, college_id, period).await?))
}

#[derive(Serialize)]
pub struct ComputeResponse {
    message: &'static str,
}

pub async fn compute(
    AxumState(state): AxumState<Arc<State>>,
    AdminUser(user): AdminUser,
) -> Result<Json<ComputeResponse>, AppError> {
    let college_id = user
        .college_id
        .ok_or_else(|| AppError::bad_request("Please complete your profile first"))?;

    compute_leaderboard(&state, college_id).await?;

    Ok(Json(ComputeResponse {
        message: "Leaderboard computed successfully",
    }))
}
