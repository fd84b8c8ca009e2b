//! # Rate Limiting
//!
//! Fixed-window counters per bucket and client IP.
//!
//! | Bucket | Window | Max |
//! | --- | --- | --- |
//! | `api` | 1 minute | 100 |
//! | `auth` | 15 minutes | 20 |
//! | `rating` | 1 minute | 10 |
//!
//! Every limited response carries `RateLimit-Limit`, `RateLimit-Remaining` and
//! `RateLimit-Reset` (seconds until the window ends).
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State as AxumState},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::{error::AppError, state::State, utils::client_ip};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    Api,
    Auth,
    Rating,
}

impl Bucket {
    pub fn window(self) -> Duration {
        match self {
            Bucket::Api | Bucket::Rating => Duration::from_secs(60),
            Bucket::Auth => Duration::from_secs(15 * 60),
        }
    }

    pub fn max(self) -> u32 {
        match self {
            Bucket::Api => 100,
            Bucket::Auth => 20,
            Bucket::Rating => 10,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Bucket::Api => "Too many requests, please try again later",
            Bucket::Auth => "Too many authentication attempts, please try again later",
            Bucket::Rating => "Too many rating submissions, please slow down",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset: Duration,
}

struct Window {
    started: Instant,
    count: u32,
}

#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<(Bucket, String), Window>,
}

impl RateLimiter {
    pub fn check(&self, bucket: Bucket, client: &str) -> Decision {
        self.check_at(bucket, client, Instant::now())
    }

    fn check_at(&self, bucket: Bucket, client: &str, now: Instant) -> Decision {
        let window_len = bucket.window();
        let mut window = self
            .windows
            .entry((bucket, client.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) >= window_len {
            window.started = now;
            window.count = 0;
        }

        let allowed = window.count < bucket.max();
        if allowed {
            window.count += 1;
        }

        Decision {
            allowed,
            limit: bucket.max(),
            remaining: bucket.max().saturating_sub(window.count),
            reset: window_len.saturating_sub(now.duration_since(window.started)),
        }
    }

    /// Forgets every window that has already ended.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|(bucket, _), window| now.duration_since(window.started) < bucket.window());

        before - self.windows.len()
    }
}

fn reset_secs(decision: &Decision) -> u64 {
    decision.reset.as_secs() + u64::from(decision.reset.subsec_nanos() > 0)
}

async fn enforce(state: &State, bucket: Bucket, request: Request, next: Next) -> Response {
    let decision = state.limiter.check(bucket, &client_ip(&request));
    let reset = reset_secs(&decision);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        AppError::TooManyRequests {
            message: bucket.message(),
            retry_after: reset,
        }
        .into_response()
    };

    // An inner, stricter bucket has already reported its own numbers.
    let headers = response.headers_mut();
    if !headers.contains_key("ratelimit-limit") {
        headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
        headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
        headers.insert("ratelimit-reset", HeaderValue::from(reset));
    }

    response
}

pub async fn api_limit(AxumState(state): AxumState<Arc<State>>, request: Request, next: Next) -> Response {
    enforce(&state, Bucket::Api, request, next).await
}

pub async fn auth_limit(AxumState(state): AxumState<Arc<State>>, request: Request, next: Next) -> Response {
    enforce(&state, Bucket::Auth, request, next).await
}

pub async fn rating_limit(
    AxumState(state): AxumState<Arc<State>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state, Bucket::Rating, request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_after_max() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        for expected_remaining in (0..10).rev() {
            let decision = limiter.check_at(Bucket::Rating, "1.1.1.1", now);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let blocked = limiter.check_at(Bucket::Rating, "1.1.1.1", now);
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.check_at(Bucket::Rating, "1.1.1.1", now);
        }
        assert!(!limiter.check_at(Bucket::Rating, "1.1.1.1", now).allowed);

        let later = now + Bucket::Rating.window();
        let decision = limiter.check_at(Bucket::Rating, "1.1.1.1", later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
    }

    #[test]
    fn test_clients_and_buckets_independent() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.check_at(Bucket::Rating, "1.1.1.1", now);
        }

        assert!(limiter.check_at(Bucket::Rating, "2.2.2.2", now).allowed);
        assert!(limiter.check_at(Bucket::Api, "1.1.1.1", now).allowed);
    }

    #[test]
    fn test_reset_counts_down() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        limiter.check_at(Bucket::Auth, "1.1.1.1", now);
        let decision = limiter.check_at(Bucket::Auth, "1.1.1.1", now + Duration::from_secs(60));

        assert_eq!(decision.reset, Duration::from_secs(14 * 60));
        assert_eq!(reset_secs(&decision), 840);
    }

    #[test]
    fn test_sweep_drops_finished_windows() {
        let limiter = RateLimiter::default();
        limiter.check_at(
            Bucket::Api,
            "old",
            Instant::now() - Duration::from_secs(120),
        );
        limiter.check(Bucket::Api, "new");

        assert_eq!(limiter.sweep(), 1);
    }
}
