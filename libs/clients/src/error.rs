use thiserror::Error;

/// Collaborator call failure.
///
/// A 404-equivalent response is `NotFound`, which callers treat as data
/// ("no such record"), never as a failure. Everything else is retryable at
/// the job level.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Maps a response to an error unless it is a success status.
    pub(crate) async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %body, "collaborator call failed");
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
