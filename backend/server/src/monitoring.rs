//! # Monitoring
//!
//! In-process request metrics, no external collector.
//!
//! - Last 1000 requests: path, method, duration, status, user
//! - Last 500 server errors with the detail the client never sees
//! - Requests slower than one second are logged at `warn`
//!
//! Stats are computed over the last hour on demand.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, OnceLock},
    time::Instant,
};

use axum::{
    extract::{Request, State as AxumState},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{error::ErrorDetail, models::round2, state::State};

const MAX_METRICS: usize = 1000;
const MAX_ERRORS: usize = 500;
const SLOW_MS: u64 = 1000;
const UPLOADS_PREFIX: &str = "/uploads/";

/// Slot the auth extractor fills so metrics can be attributed to a user.
#[derive(Clone, Default, Debug)]
pub struct RequestUser(Arc<OnceLock<Uuid>>);

impl RequestUser {
    pub fn set(&self, user_id: Uuid) {
        let _ = self.0.set(user_id);
    }

    pub fn get(&self) -> Option<Uuid> {
        self.0.get().copied()
    }
}

#[derive(Clone, Debug)]
pub struct Metric {
    pub endpoint: String,
    pub method: String,
    pub duration_ms: u64,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLog {
    pub message: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub average_response_time: u64,
    pub error_rate: f64,
    pub slow_requests: usize,
    pub time_window: &'static str,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub endpoint: String,
    pub request_count: usize,
    pub average_response_time: u64,
    pub error_count: usize,
    pub error_rate: f64,
}

#[derive(Default)]
pub struct Monitor {
    metrics: Mutex<VecDeque<Metric>>,
    errors: Mutex<VecDeque<ErrorLog>>,
}

fn push_bounded<T>(ring: &Mutex<VecDeque<T>>, item: T, max: usize) {
    let mut ring = ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    ring.push_back(item);
    while ring.len() > max {
        ring.pop_front();
    }
}

fn percent(part: usize, total: usize) -> f64 {
    round2(part as f64 / total as f64 * 100.0)
}

impl Monitor {
    pub fn record(&self, metric: Metric) {
        if metric.duration_ms > SLOW_MS {
            warn!(
                method = %metric.method,
                endpoint = %metric.endpoint,
                duration_ms = metric.duration_ms,
                "Slow request"
            );
        }

        push_bounded(&self.metrics, metric, MAX_METRICS);
    }

    pub fn record_error(&self, error: ErrorLog) {
        push_bounded(&self.errors, error, MAX_ERRORS);
    }

    fn recent(&self, now: DateTime<Utc>) -> Vec<Metric> {
        let since = now - Duration::hours(1);

        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|metric| metric.timestamp > since)
            .cloned()
            .collect()
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        let recent = self.recent(Utc::now());

        if recent.is_empty() {
            return PerformanceStats {
                total_requests: 0,
                average_response_time: 0,
                error_rate: 0.0,
                slow_requests: 0,
                time_window: "1 hour",
            };
        }

        let total = recent.len();
        let total_time: u64 = recent.iter().map(|metric| metric.duration_ms).sum();
        let errors = recent.iter().filter(|metric| metric.status_code >= 400).count();

        PerformanceStats {
            total_requests: total,
            average_response_time: (total_time as f64 / total as f64).round() as u64,
            error_rate: percent(errors, total),
            slow_requests: recent
                .iter()
                .filter(|metric| metric.duration_ms > SLOW_MS)
                .count(),
            time_window: "1 hour",
        }
    }

    pub fn endpoint_stats(&self) -> Vec<EndpointStats> {
        let mut grouped: HashMap<String, (usize, u64, usize)> = HashMap::new();

        for metric in self.recent(Utc::now()) {
            let entry = grouped
                .entry(format!("{} {}", metric.method, metric.endpoint))
                .or_default();
            entry.0 += 1;
            entry.1 += metric.duration_ms;
            if metric.status_code >= 400 {
                entry.2 += 1;
            }
        }

        let mut stats: Vec<EndpointStats> = grouped
            .into_iter()
            .map(|(endpoint, (count, total_time, errors))| EndpointStats {
                endpoint,
                request_count: count,
                average_response_time: (total_time as f64 / count as f64).round() as u64,
                error_count: errors,
                error_rate: percent(errors, count),
            })
            .collect();

        stats.sort_by(|a, b| {
            b.request_count
                .cmp(&a.request_count)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        stats
    }

    /// Newest first.
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorLog> {
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Served files share one row instead of one per file name.
fn endpoint_key(path: &str) -> String {
    if path.starts_with(UPLOADS_PREFIX) {
        return format!("{UPLOADS_PREFIX}*");
    }

    path.to_string()
}

pub async fn track(
    AxumState(state): AxumState<Arc<State>>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let request_user = RequestUser::default();
    request.extensions_mut().insert(request_user.clone());

    let method = request.method().to_string();
    let endpoint = endpoint_key(request.uri().path());

    let response = next.run(request).await;

    let status = response.status();
    let status_code = status.as_u16();
    let user_id = request_user.get();
    let timestamp = Utc::now();

    if status.is_server_error() {
        let message = match response.extensions().get::<ErrorDetail>() {
            Some(ErrorDetail(detail)) => detail.clone(),
            None => status
                .canonical_reason()
                .unwrap_or("Server error")
                .to_string(),
        };

        state.monitor.record_error(ErrorLog {
            message,
            endpoint: endpoint.clone(),
            method: method.clone(),
            status_code,
            timestamp,
            user_id,
        });
    }

    state.monitor.record(Metric {
        endpoint,
        method,
        duration_ms: started.elapsed().as_millis() as u64,
        status_code,
        timestamp,
        user_id,
    });

    response
}
