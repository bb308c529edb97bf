//! Transient-failure backoff for media endpoints
//!
//! Generation endpoints are slow and rate limited; a request is retried inside a fixed
//! window, honoring the server's pacing hint when it sends one.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest provider body excerpt carried into a failure message.
pub(crate) const BODY_EXCERPT_CHARS: usize = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub window_secs: u64,
    pub initial_delay_secs: u64,
    pub backoff_factor: u32,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            window_secs: 120,
            initial_delay_secs: 2,
            backoff_factor: 2,
            max_delay_secs: 30,
        }
    }
}

impl RetryPolicy {
    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }

    /// Delay before `attempt` (1-based) when the server gave no hint:
    /// `initial * factor^(attempt-1)`, capped at `max_delay_secs`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1).min(20);
        let growth = u64::from(self.backoff_factor.max(1)).saturating_pow(steps);
        let secs = self
            .initial_delay_secs
            .max(1)
            .saturating_mul(growth)
            .min(self.max_delay_secs.max(1));
        Duration::from_secs(secs)
    }

    /// How long to wait before the next attempt, or `None` once the window is spent.
    /// The wait never runs past the end of the window.
    pub fn pause_before(
        &self,
        attempt: u32,
        server_hint: Option<Duration>,
        elapsed: Duration,
    ) -> Option<Duration> {
        let left = self.window().checked_sub(elapsed).filter(|d| !d.is_zero())?;
        let wanted = server_hint.unwrap_or_else(|| self.backoff(attempt));
        Some(wanted.min(left).max(Duration::from_millis(1)))
    }
}

/// Rate limits, timeouts and gateway errors are worth another attempt; anything else is
/// the backend refusing this request.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

pub(crate) fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Server pacing hint: `retry-after-ms`, else `retry-after` as seconds or an HTTP date.
pub(crate) fn server_hint(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let millis = header("retry-after-ms")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);
    if millis.is_some() {
        return millis;
    }

    let value = header("retry-after")?;
    if let Ok(secs) = value.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }
    let until = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (until - Utc::now())
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}

pub(crate) fn body_excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{body_excerpt, is_transient_status, server_hint, RetryPolicy};
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;
    use std::time::Duration;

    #[test]
    fn millisecond_hint_wins_over_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("40"));
        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(server_hint(&headers), Some(Duration::from_millis(250)));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(server_hint(&headers), Some(Duration::from_secs(3)));

        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(server_hint(&headers), None);
    }

    #[test]
    fn backoff_grows_until_the_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn pause_is_clamped_to_the_window() {
        let policy = RetryPolicy {
            window_secs: 10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.pause_before(1, None, Duration::from_secs(10)), None);
        assert_eq!(
            policy.pause_before(5, None, Duration::from_secs(7)),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            policy.pause_before(1, Some(Duration::from_millis(400)), Duration::ZERO),
            Some(Duration::from_millis(400))
        );
    }

    #[test]
    fn only_pacing_and_gateway_statuses_are_transient() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_IMPLEMENTED));
    }

    #[test]
    fn long_bodies_are_cut() {
        let body = "x".repeat(700);
        let excerpt = body_excerpt(&body);
        assert_eq!(excerpt.chars().count(), 603);
        assert!(excerpt.ends_with("..."));
        assert_eq!(body_excerpt("short"), "short");
    }
}
