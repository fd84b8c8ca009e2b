use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::{FromRequestParts, State as AxumState},
    http::{header::USER_AGENT, request::Parts},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::{AppError, FieldError, StorageError},
    models::{Rating, RatingStatus, RatingView, User},
    payload::Payload,
    state::State,
    utils::{hash_rater_id, hash_value, peer_ip},
};

/// Hashed client fingerprints stored with each rating for abuse review.
pub struct ClientMeta {
    pub ip_hash: Option<String>,
    pub device_hash: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = peer_ip(&parts.headers, &parts.extensions);
        let agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok());

        Ok(ClientMeta {
            ip_hash: (ip != "unknown").then(|| hash_value(&ip)),
            device_hash: agent.map(hash_value),
        })
    }
}

/// Fields arrive untyped so bad values become field errors instead of a
/// blanket malformed-payload rejection.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    target_user_id: Option<Value>,
    score: Option<Value>,
}

fn validate_rating(request: &RatingRequest) -> Result<(Uuid, u8), AppError> {
    let mut errors = Vec::new();

    let target = match &request.target_user_id {
        Some(Value::String(raw)) => Uuid::parse_str(raw).ok(),
        _ => None,
    };
    if target.is_none() {
        errors.push(FieldError::new("targetUserId", "Target user ID must be a valid UUID"));
    }

    let score = match &request.score {
        Some(Value::Number(number)) => number
            .as_u64()
            .filter(|score| (1..=10).contains(score))
            .map(|score| score as u8),
        _ => None,
    };
    if score.is_none() {
        errors.push(FieldError::new("score", "Score must be a whole number from 1 to 10"));
    }

    match (target, score) {
        (Some(target), Some(score)) => Ok((target, score)),
        _ => Err(AppError::Validation {
            message: "Invalid rating data",
            errors,
        }),
    }
}

/// Same college and opposite gender, the only pairs that may rate each other.
fn check_eligibility(rater: &User, target: &User) -> Result<(), AppError> {
    if rater.college_id != target.college_id {
        return Err(AppError::forbidden("You can only rate users from your college"));
    }

    let opposite = rater.gender.and_then(|gender| gender.opposite());
    if opposite.is_none() || target.gender != opposite {
        return Err(AppError::forbidden("You can only rate opposite gender students"));
    }

    Ok(())
}

pub async fn create(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
    client: ClientMeta,
    Payload(request): Payload<RatingRequest>,
) -> Result<Json<RatingView>, AppError> {
    let (target_id, score) = validate_rating(&request)?;

    if target_id == user.id {
        return Err(AppError::bad_request("You cannot rate yourself"));
    }
    if !user.has_profile() {
        return Err(AppError::bad_request("Please complete your profile first"));
    }

    let target = state
        .store
        .get_user(target_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    check_eligibility(&user, &target)?;

    let rating = Rating {
        id: Uuid::new_v4(),
        rater_id_hash: hash_rater_id(&user.id.to_string(), &state.config.rating_salt),
        target_user_id: target.id,
        score,
        college_id: user.college_id,
        ip_hash: client.ip_hash,
        device_hash: client.device_hash,
        status: RatingStatus::Active,
        created_at: Utc::now(),
    };

    match state.store.insert_rating(rating.clone()).await {
        Ok(_) => {}
        Err(StorageError::Duplicate(_)) => {
            return Err(AppError::Conflict(
                "You have already rated this user".to_string(),
            ));
        }
        Err(StorageError::Missing(_)) => return Err(AppError::not_found("User not found")),
        Err(e) => return Err(e.into()),
    }

    info!(rating_id = %rating.id, target = %target.id, "Rating recorded");

    if let Some(college_id) = rating.college_id {
        state.schedule_refresh(college_id);
    }

    Ok(Json(rating.for_rater()))
}

pub async fn received(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<RatingView>>, AppError> {
    let ratings = state.store.ratings_for_user(user.id).await?;

    Ok(Json(ratings.iter().map(Rating::for_target).collect()))
}
