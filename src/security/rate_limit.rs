//! Fixed-window quotas per client.
//!
//! # Responsibilities
//! - Compile `[ip_rate_limiting]` into rules and whitelists
//! - Count admissions per (client, rule) inside aligned windows
//! - Produce the quota headers and the retry hint
//!
//! # Design Decisions
//! - Windows start at epoch multiples of the period, so every gateway
//!   instance agrees on boundaries
//! - Check-and-increment happens under the `DashMap` entry lock
//! - A request denied by one rule gives back what earlier rules took
//! - The tracker outlives configuration reloads; rules do not

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::{RateLimitConfig, RateLimitRuleConfig};
use crate::routing::matcher::{normalize_path_pattern, PathPrefixMatcher};

pub const X_RATE_LIMIT_LIMIT: &str = "x-rate-limit-limit";
pub const X_RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";
pub const X_RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

#[derive(Debug, Clone)]
enum PathPattern {
    Any,
    Prefix(PathPrefixMatcher),
    Exact(String),
}

/// `*`, `/path`, `/path/*` or `METHOD:/path/*`.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    method: Option<Method>,
    path: PathPattern,
}

impl EndpointPattern {
    pub fn parse(endpoint: &str) -> Result<Self, String> {
        let endpoint = endpoint.trim();
        let (method, pattern) = match endpoint.split_once(':') {
            Some((m, p)) if m == "*" => (None, p),
            Some((m, p)) => {
                let method = Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("'{}': invalid method '{}'", endpoint, m))?;
                (Some(method), p)
            }
            None => (None, endpoint),
        };
        let pattern = pattern.trim();

        let path = if pattern == "*" {
            PathPattern::Any
        } else {
            let wildcard = pattern.ends_with("/*") || pattern.ends_with('}');
            let prefix = normalize_path_pattern(pattern)
                .map_err(|e| format!("'{}': {}", endpoint, e))?;
            if wildcard {
                PathPattern::Prefix(PathPrefixMatcher::new(prefix))
            } else {
                PathPattern::Exact(prefix)
            }
        };

        Ok(Self { method, path })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(m) = &self.method {
            if m != method {
                return false;
            }
        }
        match &self.path {
            PathPattern::Any => true,
            PathPattern::Prefix(matcher) => matcher.matches(path),
            PathPattern::Exact(expected) => {
                let trimmed = path.trim_end_matches('/');
                let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
                trimmed.eq_ignore_ascii_case(expected)
            }
        }
    }
}

/// One compiled quota rule.
#[derive(Debug, Clone)]
pub struct QuotaRule {
    /// The endpoint text as configured; identifies the rule's counters.
    pub endpoint: Arc<str>,
    pattern: EndpointPattern,
    pub period: Duration,
    pub limit: u32,
}

impl QuotaRule {
    pub fn from_config(config: &RateLimitRuleConfig) -> Result<Self, String> {
        if config.limit == 0 {
            return Err(format!("'{}': limit must be greater than zero", config.endpoint));
        }
        if config.period.as_millis() == 0 {
            return Err(format!("'{}': period must be at least 1ms", config.endpoint));
        }
        Ok(Self {
            endpoint: Arc::from(config.endpoint.trim()),
            pattern: EndpointPattern::parse(&config.endpoint)?,
            period: config.period,
            limit: config.limit,
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.pattern.matches(method, path)
    }

    fn period_ms(&self) -> i64 {
        i64::try_from(self.period.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Compiled `[ip_rate_limiting]` section, part of a snapshot.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    real_ip_header: Option<HeaderName>,
    ip_whitelist: HashSet<String>,
    endpoint_whitelist: Vec<EndpointPattern>,
    rules: Vec<QuotaRule>,
}

impl RateLimitPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, String> {
        let real_ip_header = match config.real_ip_header.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| format!("real_ip_header '{}': {}", name, e))?,
            ),
            _ => None,
        };
        Ok(Self {
            enabled: config.enabled,
            real_ip_header,
            ip_whitelist: config.ip_whitelist.iter().map(|ip| ip.trim().to_string()).collect(),
            endpoint_whitelist: config
                .endpoint_whitelist
                .iter()
                .map(|e| EndpointPattern::parse(e.as_str()))
                .collect::<Result<_, _>>()?,
            rules: config
                .rules
                .iter()
                .map(QuotaRule::from_config)
                .collect::<Result<_, _>>()?,
        })
    }

    /// The key quotas are counted against: the trusted header when
    /// configured and present, otherwise the peer IP.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let forwarded = self
            .real_ip_header
            .as_ref()
            .and_then(|name| headers.get(name))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        match (forwarded, peer) {
            (Some(ip), _) => ip.to_string(),
            (None, Some(addr)) => addr.ip().to_string(),
            (None, None) => "unknown".to_string(),
        }
    }

    /// Rules that govern this request; empty when it is exempt.
    pub fn applicable_rules(&self, client: &str, method: &Method, path: &str) -> Vec<&QuotaRule> {
        if !self.enabled
            || self.ip_whitelist.contains(client)
            || self.endpoint_whitelist.iter().any(|e| e.matches(method, path))
        {
            return Vec::new();
        }
        self.rules.iter().filter(|r| r.matches(method, path)).collect()
    }

    pub fn rules(&self) -> &[QuotaRule] {
        &self.rules
    }
}

/// Remaining quota of the tightest rule after an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl QuotaStatus {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(self.remaining));
        if let Ok(value) =
            HeaderValue::from_str(&self.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true))
        {
            headers.insert(X_RATE_LIMIT_RESET, value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// `None` when no rule applied.
    Allowed(Option<QuotaStatus>),
    Limited {
        rule: Arc<str>,
        limit: u32,
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuotaKey {
    client: String,
    rule: Arc<str>,
    period_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: i64,
    period_ms: i64,
    count: u32,
}

/// Concurrent fixed-window counters.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    windows: DashMap<QuotaKey, Window>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or deny one request from `client` against every rule given.
    pub fn check(&self, client: &str, rules: &[&QuotaRule], now: DateTime<Utc>) -> QuotaDecision {
        let now_ms = now.timestamp_millis();
        let mut taken: Vec<(QuotaKey, i64)> = Vec::with_capacity(rules.len());
        let mut tightest: Option<QuotaStatus> = None;

        for rule in rules {
            let period_ms = rule.period_ms();
            let window_start = now_ms - now_ms.rem_euclid(period_ms);
            let key = QuotaKey {
                client: client.to_string(),
                rule: rule.endpoint.clone(),
                period_ms,
            };

            let mut window = self.windows.entry(key.clone()).or_insert(Window {
                start_ms: window_start,
                period_ms,
                count: 0,
            });
            if window.start_ms != window_start {
                window.start_ms = window_start;
                window.count = 0;
            }

            let reset_ms = window_start.saturating_add(period_ms);
            if window.count >= rule.limit {
                drop(window);
                self.release(&taken);
                let wait_ms = u64::try_from(reset_ms - now_ms).unwrap_or(0);
                return QuotaDecision::Limited {
                    rule: rule.endpoint.clone(),
                    limit: rule.limit,
                    retry_after: Duration::from_millis(wait_ms),
                };
            }

            window.count += 1;
            let remaining = rule.limit - window.count;
            drop(window);
            taken.push((key, window_start));

            if tightest.map_or(true, |t| remaining < t.remaining) {
                tightest = Some(QuotaStatus {
                    limit: rule.limit,
                    remaining,
                    reset_at: Utc
                        .timestamp_millis_opt(reset_ms)
                        .single()
                        .unwrap_or(now),
                });
            }
        }

        QuotaDecision::Allowed(tightest)
    }

    fn release(&self, taken: &[(QuotaKey, i64)]) {
        for (key, window_start) in taken {
            if let Some(mut window) = self.windows.get_mut(key) {
                if window.start_ms == *window_start && window.count > 0 {
                    window.count -= 1;
                }
            }
        }
    }

    /// Drop windows that ended before `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now_ms < w.start_ms.saturating_add(w.period_ms));
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Periodically reclaim stale windows until shutdown.
pub async fn run_sweeper(
    tracker: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = tracker.purge_expired(clock.now());
                if removed > 0 {
                    tracing::debug!(removed, remaining = tracker.len(), "Purged expired quota windows");
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Quota sweeper stopping");
                break;
            }
        }
    }
}
