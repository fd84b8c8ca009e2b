use std::sync::Arc;

use axum::{
    Json,
    extract::State as AxumState,
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::{AppError, FieldError},
    models::{Appeal, AppealReason, AppealStatus},
    payload::{Payload, parse_variant},
    state::State,
    utils::non_blank,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppealRequest {
    rating_id: Option<String>,
    reason: Option<String>,
    description: Option<String>,
}

struct ValidAppeal {
    rating_id: Option<Uuid>,
    reason: AppealReason,
    description: String,
}

fn validate_appeal(request: AppealRequest) -> Result<ValidAppeal, AppError> {
    let mut errors = Vec::new();

    let rating_id = match non_blank(request.rating_id) {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(&raw).map(Some),
    };
    if rating_id.is_err() {
        errors.push(FieldError::new("ratingId", "Rating ID must be a valid UUID"));
    }

    let reason = request.reason.as_deref().and_then(parse_variant::<AppealReason>);
    if reason.is_none() {
        errors.push(FieldError::new(
            "reason",
            "Reason must be one of inappropriate, fake_rating, harassment, spam, other",
        ));
    }

    let description = non_blank(request.description).unwrap_or_default();
    if !(10..=500).contains(&description.chars().count()) {
        errors.push(FieldError::new(
            "description",
            "Description must be 10 to 500 characters",
        ));
    }

    match (rating_id, reason) {
        (Ok(rating_id), Some(reason)) if errors.is_empty() => Ok(ValidAppeal {
            rating_id,
            reason,
            description,
        }),
        _ => Err(AppError::Validation {
            message: "Invalid appeal data",
            errors,
        }),
    }
}

pub async fn create(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
    Payload(request): Payload<AppealRequest>,
) -> Result<(StatusCode, Json<Appeal>), AppError> {
    let appeal = validate_appeal(request)?;

    // Only ratings the caller received can be appealed.
    if let Some(rating_id) = appeal.rating_id {
        state
            .store
            .get_rating(rating_id)
            .await?
            .filter(|rating| rating.target_user_id == user.id)
            .ok_or_else(|| AppError::not_found("Rating not found"))?;
    }

    let appeal = state
        .store
        .create_appeal(Appeal {
            id: Uuid::new_v4(),
            user_id: user.id,
            rating_id: appeal.rating_id,
            reason: appeal.reason,
            description: Some(appeal.description),
            status: AppealStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        })
        .await?;

    info!(appeal_id = %appeal.id, user_id = %user.id, "Appeal filed");

    Ok((StatusCode::CREATED, Json(appeal)))
}

pub async fn list(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Appeal>>, AppError> {
    Ok(Json(state.store.appeals_for_user(user.id).await?))
}
