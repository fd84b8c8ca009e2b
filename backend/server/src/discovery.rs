//! Profile discovery: who a user may see and rate.
//!
//! A candidate shares the viewer's college, has the opposite gender, is
//! verified, and is not the viewer. `other` has no opposite and sees nobody.
use std::{collections::HashSet, sync::Arc};

use axum::{
    Json,
    extract::{Query, State as AxumState},
};
use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{PublicProfile, User},
    state::State,
    utils::{clamp_limit, hash_rater_id},
};

const MAX_LIMIT: usize = 50;

pub fn is_candidate(viewer: &User, other: &User) -> bool {
    let Some(wanted) = viewer.gender.and_then(|gender| gender.opposite()) else {
        return false;
    };

    other.id != viewer.id
        && other.college_id.is_some()
        && other.college_id == viewer.college_id
        && other.gender == Some(wanted)
        && other.is_verified()
}

/// Unrated candidates in random order.
pub fn random_profiles<R: Rng + ?Sized>(
    viewer: &User,
    pool: &[User],
    rated: &HashSet<Uuid>,
    limit: usize,
    rng: &mut R,
) -> Vec<PublicProfile> {
    let mut candidates: Vec<&User> = pool
        .iter()
        .filter(|user| is_candidate(viewer, user) && !rated.contains(&user.id))
        .collect();

    candidates.shuffle(rng);
    candidates.truncate(limit);
    candidates.into_iter().map(User::public).collect()
}

fn name_matches(user: &User, needle: &str) -> bool {
    [&user.first_name, &user.last_name, &user.display_name]
        .into_iter()
        .flatten()
        .any(|name| name.to_lowercase().contains(needle))
}

/// Candidates whose first, last or display name contains `query`, ignoring case.
pub fn search_profiles(viewer: &User, pool: &[User], query: &str, limit: usize) -> Vec<PublicProfile> {
    let needle = query.to_lowercase();

    let mut matches: Vec<&User> = pool
        .iter()
        .filter(|user| is_candidate(viewer, user) && name_matches(user, &needle))
        .collect();

    matches.sort_by(|a, b| {
        a.first_name
            .cmp(&b.first_name)
            .then_with(|| a.last_name.cmp(&b.last_name))
    });
    matches.truncate(limit);
    matches.into_iter().map(User::public).collect()
}

fn require_profile(user: &User) -> Result<Uuid, AppError> {
    match user.college_id {
        Some(college_id) if user.has_profile() => Ok(college_id),
        _ => Err(AppError::bad_request("Please complete your profile first")),
    }
}

#[derive(Deserialize)]
pub struct RandomQuery {
    limit: Option<usize>,
}

pub async fn random(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<RandomQuery>,
) -> Result<Json<Vec<PublicProfile>>, AppError> {
    let college_id = require_profile(&user)?;
    let limit = clamp_limit(query.limit, 10, MAX_LIMIT);

    let pool = state.store.college_users(college_id).await?;
    let rater_hash = hash_rater_id(&user.id.to_string(), &state.config.rating_salt);
    let rated = state.store.rated_targets(&rater_hash).await?;

    Ok(Json(random_profiles(
        &user,
        &pool,
        &rated,
        limit,
        &mut rand::thread_rng(),
    )))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
    limit: Option<usize>,
}

pub async fn search(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PublicProfile>>, AppError> {
    let college_id = require_profile(&user)?;

    let needle = query.q.as_deref().map(str::trim).unwrap_or_default();
    if needle.is_empty() {
        return Err(AppError::bad_request("Search query is required"));
    }
    let limit = clamp_limit(query.limit, 20, MAX_LIMIT);

    let pool = state.store.college_users(college_id).await?;

    Ok(Json(search_profiles(&user, &pool, needle, limit)))
}
