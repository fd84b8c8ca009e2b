use std::{net::SocketAddr, sync::LazyLock};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap, Request, header::COOKIE},
};
use regex::Regex;
use sha2::{Digest, Sha256};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@([a-z0-9-]+(\.[a-z0-9-]+)+)$").expect("email pattern compiles")
});

pub fn hash_value(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Anonymous rater identity, stable per user for a given salt.
pub fn hash_rater_id(rater_id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rater_id.as_bytes());
    hasher.update(salt.as_bytes());

    hex::encode(hasher.finalize())
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Domain of an already normalized address, `None` when it is not an email.
pub fn email_domain(email: &str) -> Option<&str> {
    EMAIL
        .captures(email)
        .and_then(|captures| captures.get(1))
        .map(|domain| domain.as_str())
}

pub fn client_ip<B>(request: &Request<B>) -> String {
    peer_ip(request.headers(), request.extensions())
}

/// First `X-Forwarded-For` hop, else the socket peer.
pub fn peer_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    forwarded_for(headers)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Trims the value, treating an empty result as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn clamp_limit(raw: Option<usize>, default: usize, max: usize) -> usize {
    raw.unwrap_or(default).clamp(1, max)
}
