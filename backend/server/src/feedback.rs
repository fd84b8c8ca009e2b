use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State as AxumState},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AdminUser, CurrentUser},
    error::{AppError, FieldError},
    models::{Feedback, FeedbackType},
    payload::{Payload, parse_variant},
    state::State,
    utils::{clamp_limit, non_blank},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
    title: Option<String>,
    description: Option<String>,
    rating: Option<Value>,
    device_info: Option<String>,
}

fn check_length(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) {
    if !(min..=max).contains(&value.chars().count()) {
        errors.push(FieldError::new(
            field,
            format!("Must be {min} to {max} characters"),
        ));
    }
}

fn validate_feedback(request: FeedbackRequest, user_id: Uuid) -> Result<Feedback, AppError> {
    let mut errors = Vec::new();

    let kind = request.kind.as_deref().and_then(parse_variant::<FeedbackType>);
    if kind.is_none() {
        errors.push(FieldError::new(
            "type",
            "Type must be one of bug, feature, improvement, other",
        ));
    }

    let title = non_blank(request.title).unwrap_or_default();
    check_length(&mut errors, "title", &title, 5, 100);

    let description = non_blank(request.description).unwrap_or_default();
    check_length(&mut errors, "description", &description, 10, 1000);

    let rating = match request.rating {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .filter(|rating| (1..=5).contains(rating))
            .map(|rating| Some(rating as u8))
            .ok_or(()),
        Some(_) => Err(()),
    };
    if rating.is_err() {
        errors.push(FieldError::new("rating", "Rating must be a whole number from 1 to 5"));
    }

    let (Some(kind), Ok(rating), true) = (kind, rating, errors.is_empty()) else {
        return Err(AppError::Validation {
            message: "Invalid feedback data",
            errors,
        });
    };

    let now = Utc::now();

    Ok(Feedback {
        id: Uuid::new_v4(),
        user_id,
        kind,
        category: non_blank(request.category),
        title,
        description,
        rating,
        status: "open".to_string(),
        priority: "medium".to_string(),
        device_info: non_blank(request.device_info),
        created_at: now,
        updated_at: now,
    })
}

pub async fn create(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
    Payload(request): Payload<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), AppError> {
    let feedback = validate_feedback(request, user.id)?;
    let feedback = state.store.create_feedback(feedback).await?;

    info!(feedback_id = %feedback.id, kind = ?feedback.kind, "Feedback submitted");

    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn list(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Feedback>>, AppError> {
    Ok(Json(state.store.feedback_for_user(user.id).await?))
}

#[derive(Deserialize)]
pub struct AdminFeedbackQuery {
    limit: Option<usize>,
}

pub async fn list_all(
    AxumState(state): AxumState<Arc<State>>,
    _admin: AdminUser,
    Query(query): Query<AdminFeedbackQuery>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    let limit = clamp_limit(query.limit, 50, 200);

    Ok(Json(state.store.all_feedback(limit).await?))
}
