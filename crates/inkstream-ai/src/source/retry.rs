use std::time::Duration;

use reqwest::Response;

use crate::error::AiError;

/// Backoff policy for the initial upstream request.
///
/// Only the request that opens the stream is retried; once deltas flow, a
/// failure is final for that stream.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 250,
            max_delay_ms: 4_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after_secs {
            return Duration::from_secs(seconds).min(Duration::from_millis(self.max_delay_ms));
        }

        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

pub async fn response_to_error(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    // Upstream error bodies can be large or echo request content.
    const MAX_ERROR_BODY: usize = 512;
    let message = if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &body[..end])
    } else {
        body
    };

    AiError::LlmHttp {
        provider: provider.to_string(),
        status,
        message,
        retry_after_secs: retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_progression() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(6, None), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_after_overrides_backoff_but_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(3, Some(2)), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, Some(60)), Duration::from_millis(4000));
    }

    #[test]
    fn test_error_retryability() {
        let rate_limited = AiError::LlmHttp {
            provider: "Test".to_string(),
            status: 429,
            message: "rate limit".to_string(),
            retry_after_secs: Some(1),
        };
        let unauthorized = AiError::LlmHttp {
            provider: "Test".to_string(),
            status: 401,
            message: "unauthorized".to_string(),
            retry_after_secs: None,
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after(), Some(1));
        assert!(!unauthorized.is_retryable());
        assert!(!AiError::Llm("bad request".to_string()).is_retryable());
    }
}
