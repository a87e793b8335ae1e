//! Throttling detection and backoff for outbound HTTP calls: the chat providers and the
//! Document Intelligence analyze/poll requests.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub(crate) const MAX_ATTEMPTS: usize = 5;
pub(crate) const BASE_DELAY: Duration = Duration::from_secs(2);
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(60);

/// Attempt budget and doubling delay for one logical request.
#[derive(Debug)]
pub(crate) struct Backoff {
    service: &'static str,
    attempts: usize,
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new(service: &'static str) -> Self {
        Self {
            service,
            attempts: 0,
            delay: BASE_DELAY,
        }
    }

    /// Records a throttled attempt and sleeps before the next one. Returns `false` without
    /// sleeping once [`MAX_ATTEMPTS`] have been used.
    pub(crate) async fn retry(&mut self, hint: Option<Duration>) -> bool {
        self.attempts += 1;
        if self.attempts >= MAX_ATTEMPTS {
            return false;
        }
        let wait = throttle_wait(self.delay, hint);
        warn!(
            "{} throttled; retrying in {:.1}s (attempt {}/{})",
            self.service,
            wait.as_secs_f32(),
            self.attempts,
            MAX_ATTEMPTS
        );
        sleep(wait).await;
        self.delay = next_delay(self.delay);
        true
    }
}

pub(crate) fn is_throttled(status: StatusCode, body: &str) -> bool {
    if matches!(status.as_u16(), 429 | 503 | 529) {
        return true;
    }
    let lower = body.to_lowercase();
    [
        "rate limit",
        "rate_limit",
        "too many requests",
        "resource_exhausted",
        "quota",
        "overloaded",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Server-requested wait. Azure sends `retry-after-ms` alongside the seconds header, and
/// the millisecond value wins when both are present. HTTP-date values are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    if let Some(ms) = header("retry-after-ms").and_then(|value| value.parse::<u64>().ok()) {
        return Some(Duration::from_millis(ms));
    }
    header("retry-after")
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pause between polls of a long-running operation: the server's hint when it sends one,
/// otherwise `interval`, never longer than [`MAX_DELAY`].
pub(crate) fn poll_delay(headers: &HeaderMap, interval: Duration) -> Duration {
    retry_after(headers).unwrap_or(interval).min(MAX_DELAY)
}

fn throttle_wait(delay: Duration, hint: Option<Duration>) -> Duration {
    match hint {
        Some(hint) => delay.max(hint.min(MAX_DELAY)),
        None => delay,
    }
}

fn next_delay(current: Duration) -> Duration {
    current.saturating_mul(2).clamp(BASE_DELAY, MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let mut delay = BASE_DELAY;
        let mut seen = Vec::new();
        for _ in 0..6 {
            delay = next_delay(delay);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![4, 8, 16, 32, 60, 60]);
        assert_eq!(next_delay(Duration::ZERO), BASE_DELAY);
        assert_eq!(next_delay(Duration::MAX), MAX_DELAY);
    }

    #[test]
    fn throttling_is_detected_from_status_or_body() {
        assert!(is_throttled(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_throttled(StatusCode::SERVICE_UNAVAILABLE, ""));
        assert!(is_throttled(StatusCode::from_u16(529).expect("status"), ""));
        assert!(is_throttled(
            StatusCode::BAD_REQUEST,
            "{\"error\":{\"status\":\"RESOURCE_EXHAUSTED\"}}"
        ));
        assert!(is_throttled(StatusCode::FORBIDDEN, "Out of call volume quota"));
        assert!(!is_throttled(StatusCode::UNAUTHORIZED, "invalid api key"));
        assert!(!is_throttled(StatusCode::INTERNAL_SERVER_ERROR, ""));
    }

    #[test]
    fn retry_after_prefers_milliseconds() {
        assert_eq!(
            retry_after(&headers(&[("retry-after", "3")])),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "3"), ("retry-after-ms", "250")])),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")])),
            None
        );
        assert_eq!(retry_after(&headers(&[("retry-after", " ")])), None);
    }

    #[test]
    fn poll_delay_follows_hint_within_cap() {
        let interval = Duration::from_secs(1);
        assert_eq!(poll_delay(&HeaderMap::new(), interval), interval);
        assert_eq!(
            poll_delay(&headers(&[("retry-after", "2")]), interval),
            Duration::from_secs(2)
        );
        assert_eq!(
            poll_delay(&headers(&[("retry-after-ms", "500")]), interval),
            Duration::from_millis(500)
        );
        assert_eq!(poll_delay(&headers(&[("retry-after", "600")]), interval), MAX_DELAY);
    }

    #[test]
    fn server_hint_only_lengthens_the_wait() {
        let delay = Duration::from_secs(4);
        assert_eq!(throttle_wait(delay, None), delay);
        assert_eq!(throttle_wait(delay, Some(Duration::from_secs(1))), delay);
        assert_eq!(
            throttle_wait(delay, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(throttle_wait(delay, Some(Duration::from_secs(3600))), MAX_DELAY);
    }

    #[tokio::test]
    async fn budget_is_spent_after_max_attempts() {
        let mut backoff = Backoff::new("test");
        backoff.attempts = MAX_ATTEMPTS - 1;
        assert!(!backoff.retry(None).await);
        assert_eq!(backoff.delay, BASE_DELAY);
    }
}
