use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State as AxumState},
    http::{HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::warn;

use crate::{
    appeals,
    auth::{self, AdminUser},
    cache::keys,
    discovery,
    error::AppError,
    feedback, leaderboard,
    limiter::{api_limit, auth_limit, rating_limit},
    models::College,
    monitoring::{EndpointStats, ErrorLog, PerformanceStats, track},
    profile::{self, MAX_IMAGE_BYTES},
    ratings,
    state::State,
    utils::clamp_limit,
};

/// Room for a full-size image plus the rest of the multipart envelope.
const UPLOAD_BODY_LIMIT: usize = MAX_IMAGE_BYTES + 1024 * 1024;

pub fn router(state: Arc<State>) -> Router {
    let auth_limited = || from_fn_with_state(state.clone(), auth_limit);

    let api = Router::new()
        .route("/api/auth/register", post(auth::register).route_layer(auth_limited()))
        .route("/api/auth/login", post(auth::login).route_layer(auth_limited()))
        .route("/api/auth/user", get(auth::current_user).route_layer(auth_limited()))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/logout", get(auth::logout_redirect))
        .route("/api/profile", get(profile::get_profile))
        .route(
            "/api/profile/setup",
            post(profile::setup)
                .route_layer(auth_limited())
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/api/profile/image",
            post(profile::upload_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/colleges", get(colleges))
        .route("/api/profiles/random", get(discovery::random))
        .route("/api/profiles/search", get(discovery::search))
        .route(
            "/api/ratings",
            post(ratings::create).route_layer(from_fn_with_state(state.clone(), rating_limit)),
        )
        .route("/api/ratings/received", get(ratings::received))
        .route("/api/leaderboard", get(leaderboard::get_leaderboard))
        .route("/api/appeals", post(appeals::create).get(appeals::list))
        .route("/api/feedback", post(feedback::create).get(feedback::list))
        .route("/api/admin/compute-leaderboard", post(leaderboard::compute))
        .route("/api/admin/feedback", get(feedback::list_all))
        .route("/api/admin/metrics", get(metrics))
        .layer(from_fn_with_state(state.clone(), api_limit));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .nest_service("/uploads", ServeDir::new(&state.config.uploads_dir))
        .layer(from_fn_with_state(state.clone(), track))
        .layer(cors(&state.config.cors_origin))
        .with_state(state)
}

fn cors(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    match HeaderValue::from_str(origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(origin, "CORS_ORIGIN is not a valid header value, cross-origin requests disabled");
            layer
        }
    }
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    storage: &'static str,
}

pub async fn health(AxumState(state): AxumState<Arc<State>>) -> (StatusCode, Json<Health>) {
    let storage = state.store.engine();

    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Health {
                status: "ok",
                storage,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Health {
                    status: "unavailable",
                    storage,
                }),
            )
        }
    }
}

pub async fn colleges(AxumState(state): AxumState<Arc<State>>) -> Result<Json<Vec<College>>, AppError> {
    if let Some(colleges) = state.colleges.get(keys::colleges()) {
        return Ok(Json(colleges));
    }

    let colleges = state.store.list_colleges().await?;
    state.colleges.set(keys::colleges(), colleges.clone());

    Ok(Json(colleges))
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    errors: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    performance: PerformanceStats,
    endpoints: Vec<EndpointStats>,
    recent_errors: Vec<ErrorLog>,
}

pub async fn metrics(
    AxumState(state): AxumState<Arc<State>>,
    _admin: AdminUser,
    Query(query): Query<MetricsQuery>,
) -> Json<MetricsReport> {
    let limit = clamp_limit(query.errors, 10, 100);

    Json(MetricsReport {
        performance: state.monitor.performance_stats(),
        endpoints: state.monitor.endpoint_stats(),
        recent_errors: state.monitor.recent_errors(limit),
    })
}
