//! Classification of HTTP statuses into the client's closed error taxonomy.

use reqwest::StatusCode;

/// Errors raised for terminal responses, i.e. responses that were not
/// retried or that exhausted their retry budget.
///
/// Each kind carries the raw response body as diagnostic text; the kind
/// itself is chosen from the status code alone.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request (HTTP 400)
    BadRequest(String),
    /// Resource not found (HTTP 404)
    NotFound(String),
    /// Rate limit exceeded (HTTP 429)
    RateLimited(String),
    /// The backend timed out answering (HTTP 504)
    GatewayTimeout(String),
    /// Any other non-2xx status
    ServerError(String),
    /// Connection-level failure that exhausted the retry budget
    Transport(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(body) => {
                write!(f, "Bad request: {}", body)
            }
            ApiError::NotFound(body) => {
                write!(f, "Not found: {}", body)
            }
            ApiError::RateLimited(body) => {
                write!(
                    f,
                    "Rate limited: {}. Reduce your request rate and try again later.",
                    body
                )
            }
            ApiError::GatewayTimeout(body) => {
                write!(
                    f,
                    "Your request timed out on the server: {}. Consider reducing the complexity of your request.",
                    body
                )
            }
            ApiError::ServerError(body) => {
                write!(f, "Server error: {}", body)
            }
            ApiError::Transport(msg) => {
                write!(f, "Transport failure: {}", msg)
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Maps a status code to its error kind. Pure and total over all status
/// codes: 2xx means success and yields `None`, everything else yields the
/// matching [`ApiError`] carrying `body` verbatim.
pub fn classify(status: StatusCode, body: &str) -> Option<ApiError> {
    if status.is_success() {
        return None;
    }

    let body = body.to_string();
    Some(match status {
        StatusCode::BAD_REQUEST => ApiError::BadRequest(body),
        StatusCode::NOT_FOUND => ApiError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited(body),
        StatusCode::GATEWAY_TIMEOUT => ApiError::GatewayTimeout(body),
        _ => ApiError::ServerError(body),
    })
}
