use thiserror::Error;

/// Errors returned by [`IntakeClient`](super::IntakeClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error body (`{"error", "code"}`).
    #[error("API error (status {status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// HTTP 503: storage outage on the server. Worth retrying later.
    #[error("service unavailable, retry after {retry_after_secs}s")]
    Unavailable { retry_after_secs: u64 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ClientError::Api {
            status: 404,
            code: "NOT_FOUND".into(),
            message: "Job not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "API error (status 404, NOT_FOUND): Job not found"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientError>();
    }
}
