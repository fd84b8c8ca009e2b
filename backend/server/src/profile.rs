use std::{path::Path, sync::Arc};

use axum::{
    Json,
    extract::{Multipart, State as AxumState},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::{AppError, FieldError},
    models::{Gender, UserView, VerificationMethod, VerificationStatus},
    payload::{FormParts, FromForm, JsonOrForm, Upload, read_form},
    state::State,
    utils::{email_domain, non_blank},
};

pub const IMAGE_FIELD: &str = "profileImage";
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSetup {
    college_id: Option<String>,
    gender: Option<String>,
    display_name: Option<String>,
    bio: Option<String>,
}

impl FromForm for ProfileSetup {
    const FILE_FIELD: &'static str = IMAGE_FIELD;

    fn from_form(form: &mut FormParts) -> Self {
        Self {
            college_id: form.take("collegeId"),
            gender: form.take("gender"),
            display_name: form.take("displayName"),
            bio: form.take("bio"),
        }
    }
}

struct ValidSetup {
    college_id: Uuid,
    gender: Gender,
    display_name: Option<String>,
    bio: Option<String>,
}

fn validate_setup(setup: ProfileSetup) -> Result<ValidSetup, AppError> {
    let mut errors = Vec::new();

    let college_id = setup
        .college_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok());
    if college_id.is_none() {
        errors.push(FieldError::new("collegeId", "Valid college ID is required"));
    }

    let gender = setup.gender.as_deref().and_then(|raw| Gender::parse(raw.trim()));
    if gender.is_none() {
        errors.push(FieldError::new("gender", "Valid gender is required"));
    }

    let display_name = non_blank(setup.display_name);
    if display_name.as_ref().is_some_and(|name| name.chars().count() > 50) {
        errors.push(FieldError::new("displayName", "Display name must be at most 50 characters"));
    }

    let bio = non_blank(setup.bio);
    if bio.as_ref().is_some_and(|bio| bio.chars().count() > 500) {
        errors.push(FieldError::new("bio", "Bio must be at most 500 characters"));
    }

    match (college_id, gender) {
        (Some(college_id), Some(gender)) if errors.is_empty() => Ok(ValidSetup {
            college_id,
            gender,
            display_name,
            bio,
        }),
        _ => Err(AppError::Validation {
            message: "Invalid profile data",
            errors,
        }),
    }
}

/// Writes the image under `{uploads}/profiles/` and returns its public URL.
pub async fn save_image(uploads: &Path, user_id: Uuid, upload: &Upload) -> Result<String, AppError> {
    let extension = Path::new(&upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| AppError::bad_request("Only image files are allowed"))?;

    if upload.bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::PayloadTooLarge("File too large".to_string()));
    }

    let directory = uploads.join("profiles");
    tokio::fs::create_dir_all(&directory)
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))?;

    let file_name = format!("{user_id}-{}.{extension}", Utc::now().timestamp_millis());
    tokio::fs::write(directory.join(&file_name), &upload.bytes)
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))?;

    Ok(format!("/uploads/profiles/{file_name}"))
}

pub async fn get_profile(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(user.view())
}

pub async fn setup(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(mut user): CurrentUser,
    JsonOrForm { body, file }: JsonOrForm<ProfileSetup>,
) -> Result<Json<UserView>, AppError> {
    let setup = validate_setup(body)?;

    let college = state
        .store
        .get_college(setup.college_id)
        .await?
        .filter(|college| college.is_active)
        .ok_or_else(|| AppError::bad_request("Invalid college"))?;

    if email_domain(&user.email) != Some(college.email_domain.as_str()) {
        return Err(AppError::bad_request(
            "Email domain does not match the selected college",
        ));
    }

    if let Some(upload) = file {
        user.profile_image_url = Some(save_image(&state.config.uploads_dir, user.id, &upload).await?);
    }

    user.college_id = Some(college.id);
    user.gender = Some(setup.gender);
    user.display_name = setup.display_name;
    user.bio = setup.bio;
    user.verification_status = VerificationStatus::Verified;
    user.verification_method = Some(VerificationMethod::Email);
    user.last_active_at = Some(Utc::now());

    let user = state.store.save_user(user).await?;
    info!(user_id = %user.id, college = %college.name, "Profile completed");

    Ok(Json(user.view()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    message: &'static str,
    profile_image_url: String,
}

pub async fn upload_image(
    AxumState(state): AxumState<Arc<State>>,
    CurrentUser(mut user): CurrentUser,
    multipart: Multipart,
) -> Result<Json<ImageResponse>, AppError> {
    let form = read_form(multipart, IMAGE_FIELD).await?;
    let upload = form
        .file
        .ok_or_else(|| AppError::bad_request("No image uploaded"))?;

    let url = save_image(&state.config.uploads_dir, user.id, &upload).await?;
    user.profile_image_url = Some(url.clone());
    state.store.save_user(user).await?;

    Ok(Json(ImageResponse {
        message: "Profile image uploaded",
        profile_image_url: url,
    }))
}
