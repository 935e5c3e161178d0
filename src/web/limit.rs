//! Per-client submission limiting.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Sliding-window log of generation requests, keyed by client address.
pub struct RequestLimiter {
    max_requests: usize,
    window: Duration,
    log: DashMap<String, VecDeque<Instant>>,
}

impl RequestLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            log: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    /// Record a request for `key` if it is within the limit.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.log.entry(key.to_string()).or_default();
        while entries
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            entries.pop_front();
        }
        if entries.len() >= self.max_requests {
            debug!(client = %key, requests = entries.len(), "request limit reached");
            return false;
        }
        entries.push_back(now);
        true
    }

    /// Forget clients whose whole log has aged out of the window.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.log.len();
        self.log.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|t| now.duration_since(*t) < self.window)
        });
        before - self.log.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.log.len()
    }
}

/// Who is asking: first `X-Forwarded-For` hop, else the peer IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = forwarded {
            return Ok(ClientKey(client.to_string()));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientKey(peer))
    }
}
