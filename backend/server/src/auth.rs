//! # Sessions
//!
//! Passwordless college-email login.
//!
//! ## Flow
//!
//! - Register with a college email: the domain picks the college
//! - Login with the email alone, any password is accepted and ignored
//! - Both hand back a `campus_crush_sid` cookie naming a stored session
//! - Every protected handler takes a [`CurrentUser`], which resolves the cookie
//!   to a session and the session to a user
//!
//! ## Cookie
//!
//! - `HttpOnly; SameSite=Lax; Path=/; Max-Age=<session ttl>`
//! - `Secure` when `SECURE_COOKIES=true`
//! - Logout deletes the session and overwrites the cookie with `Max-Age=0`
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State as AxumState},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{LOCATION, SET_COOKIE},
        request::Parts,
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, FieldError, StorageError},
    models::{Session, User, UserView, VerificationMethod, VerificationStatus},
    monitoring::RequestUser,
    payload::Payload,
    state::State,
    utils::{email_domain, non_blank, normalize_email, read_cookie},
};

pub const SESSION_COOKIE: &str = "campus_crush_sid";

pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<State>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
        let session_id = read_cookie(&parts.headers, SESSION_COOKIE).ok_or(AppError::Unauthorized)?;

        let session = state
            .store
            .get_session(&session_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let user = state
            .store
            .get_user(session.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if let Some(slot) = parts.extensions.get::<RequestUser>() {
            slot.set(user.id);
        }

        Ok(CurrentUser(user))
    }
}

/// A signed-in user listed in `ADMIN_EMAILS` (anyone when the list is empty).
pub struct AdminUser(pub User);

impl FromRequestParts<Arc<State>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;

        if !state.config.is_admin(Some(user.email.as_str())) {
            return Err(AppError::forbidden("Admin access required"));
        }

        Ok(AdminUser(user))
    }
}

fn session_cookie(state: &State, value: &str, max_age: u64) -> Result<HeaderValue, AppError> {
    let secure = if state.config.secure_cookies {
        "; Secure"
    } else {
        ""
    };

    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}{secure}"
    ))
    .map_err(|e| AppError::InternalError(Box::new(e)))
}

/// Stores a fresh session for the user and returns its `Set-Cookie` value.
pub async fn open_session(state: &State, user_id: Uuid) -> Result<HeaderValue, AppError> {
    let ttl = state.config.session_ttl;
    let session = Session {
        id: Uuid::new_v4().simple().to_string(),
        user_id,
        expires_at: Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| AppError::InternalError(Box::new(e)))?,
    };
    let cookie = session_cookie(state, &session.id, ttl.as_secs())?;

    state.store.create_session(session).await?;

    Ok(cookie)
}

async fn close_session(state: &State, headers: &HeaderMap) -> Result<HeaderValue, AppError> {
    if let Some(session_id) = read_cookie(headers, SESSION_COOKIE) {
        state.store.delete_session(&session_id).await?;
    }

    session_cookie(state, "", 0)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    college_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    message: &'static str,
    user: UserView,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn register(
    AxumState(state): AxumState<Arc<State>>,
    Payload(request): Payload<RegisterRequest>,
) -> Result<Response, AppError> {
    let email = request.email.as_deref().map(normalize_email).unwrap_or_default();
    let first_name = non_blank(request.first_name);

    let mut errors = Vec::new();
    let domain = email_domain(&email).map(str::to_string);
    if domain.is_none() {
        errors.push(FieldError::new("email", "A valid email is required"));
    }
    match &first_name {
        None => errors.push(FieldError::new("firstName", "First name is required")),
        Some(name) if name.chars().count() > 50 => {
            errors.push(FieldError::new("firstName", "First name too long"))
        }
        Some(_) => {}
    }
    let (Some(domain), true) = (domain, errors.is_empty()) else {
        return Err(AppError::Validation {
            message: "Invalid registration data",
            errors,
        });
    };

    let college = state
        .store
        .get_college_by_domain(&domain)
        .await?
        .filter(|college| college.is_active)
        .ok_or_else(|| AppError::bad_request("Please use your college email address"))?;

    if request.college_id.is_some_and(|id| id != college.id) {
        return Err(AppError::bad_request(
            "Email domain does not match the selected college",
        ));
    }

    let mut user = User::new(&email);
    user.first_name = first_name;
    user.last_name = non_blank(request.last_name);
    user.college_id = Some(college.id);
    user.verification_status = VerificationStatus::Pending;
    user.verification_method = Some(VerificationMethod::Email);
    user.last_active_at = Some(Utc::now());

    let user = match state.store.create_user(user).await {
        Ok(user) => user,
        Err(StorageError::Duplicate(_)) => {
            return Err(AppError::Conflict(
                "An account with this email already exists".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, college = %college.name, "User registered");

    let cookie = open_session(&state, user.id).await?;

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, cookie)],
        Json(user.view()),
    )
        .into_response())
}

pub async fn login(
    AxumState(state): AxumState<Arc<State>>,
    Payload(request): Payload<LoginRequest>,
) -> Result<Response, AppError> {
    let email = request.email.as_deref().map(normalize_email).unwrap_or_default();
    if email.is_empty() {
        return Err(AppError::Validation {
            message: "Invalid login data",
            errors: vec![FieldError::new("email", "Email is required")],
        });
    }

    let mut user = state
        .store
        .get_user_by_email(&email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    user.last_active_at = Some(Utc::now());
    let user = state.store.save_user(user).await?;

    let cookie = open_session(&state, user.id).await?;
    info!(user_id = %user.id, "User logged in");

    Ok((
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            message: "Login successful",
            user: user.view(),
        }),
    )
        .into_response())
}

pub async fn logout(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let cookie = close_session(&state, &headers).await?;

    Ok((
        [(SET_COOKIE, cookie)],
        Json(MessageResponse {
            message: "Logged out",
        }),
    )
        .into_response())
}

/// Browser variant of logout: clears the session then sends the user home.
pub async fn logout_redirect(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let cookie = close_session(&state, &headers).await?;

    Ok((
        StatusCode::FOUND,
        [(SET_COOKIE, cookie), (LOCATION, HeaderValue::from_static("/"))],
    )
        .into_response())
}

pub async fn current_user(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(user.view())
}
