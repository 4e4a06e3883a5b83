use std::time::Duration;

/// Terminal failures of a lane submission.
///
/// Downstream services also use [`LaneError::RateLimited`] to signal a transient
/// rejection; it is the only kind the lane handles internally.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LaneError {
    /// The downstream rejected the call as over its rate limit.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`.
    #[error("Rate limited by downstream")]
    RateLimited,

    /// The downstream failed in a way that retrying will not fix.
    ///
    /// The string contains the `Display` representation of the downstream error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Downstream failed: {0}")]
    PermanentFailure(String),

    /// Every attempt was rate limited.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Request failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of downstream invocations made.
        attempts: u32,
    },

    /// The caller's deadline elapsed before an outcome arrived.
    ///
    /// When the `axum` feature is enabled, this converts to `504 Gateway Timeout`.
    #[error("Request timed out")]
    TimedOut,

    /// The lane shut down before the request completed.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Lane is shutting down; request aborted")]
    Aborted,

    /// The admission queue is full and the caller asked not to wait.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Admission queue is full; request shed")]
    Overloaded,
}

impl LaneError {
    /// Whether re-submitting the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PermanentFailure(_))
    }

    /// Suggested wait before re-submitting, when one is meaningful.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited | Self::RetriesExhausted { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Stable label used for metrics and logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::PermanentFailure(_) => "permanent_failure",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
            Self::Overloaded => "overloaded",
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for LaneError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::RateLimited | Self::RetriesExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PermanentFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            Self::Aborted | Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        };
        let retry_after = self.retry_after();

        let mut response = (status, self.to_string()).into_response();
        if let Some(retry_after) = retry_after {
            let secs = retry_after.as_secs().max(1);
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from(secs),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_separates_final_from_retryable() {
        assert!(LaneError::RateLimited.is_retryable());
        assert!(LaneError::RetriesExhausted { attempts: 5 }.is_retryable());
        assert!(LaneError::TimedOut.is_retryable());
        assert!(LaneError::Aborted.is_retryable());
        assert!(LaneError::Overloaded.is_retryable());
        assert!(!LaneError::PermanentFailure("boom".into()).is_retryable());
    }

    #[test]
    fn it_survives_boxing() {
        let boxed: tower::BoxError = Box::new(LaneError::RateLimited);
        assert_eq!(
            boxed.downcast_ref::<LaneError>(),
            Some(&LaneError::RateLimited)
        );
    }

    #[cfg(feature = "axum")]
    #[test]
    fn it_maps_to_distinct_statuses() {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let exhausted = LaneError::RetriesExhausted { attempts: 5 }.into_response();
        assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(exhausted.headers().contains_key(http::header::RETRY_AFTER));

        assert_eq!(
            LaneError::PermanentFailure("x".into())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            LaneError::TimedOut.into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            LaneError::Aborted.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
