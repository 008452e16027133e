//! Error types shared by the fetchers, the delivery channel and the state store.
use reqwest::StatusCode;
use teloxide::RequestError;
use thiserror::Error;

/// Maximum number of response-body characters kept for diagnostics.
const SNIPPET_LEN: usize = 200;

/// Failure while talking to the listing, detail or photo host.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {snippet}")]
    Protocol { status: StatusCode, snippet: String },
    #[error("not found")]
    NotFound,
    #[error("unexpected payload: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn protocol(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::NOT_FOUND {
            return FetchError::NotFound;
        }
        FetchError::Protocol {
            status,
            snippet: snippet(body),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        FetchError::Parse(message.into())
    }
}

/// The messaging channel refused or never received a request.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("channel rejected request: {0}")]
    Rejected(String),
    #[error("channel unreachable: {0}")]
    Transport(String),
}

impl From<RequestError> for DeliveryError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Network(inner) => DeliveryError::Transport(inner.to_string()),
            RequestError::Io(inner) => DeliveryError::Transport(inner.to_string()),
            other => DeliveryError::Rejected(snippet(&other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("state file is corrupt: {0}")]
    Corrupt(String),
    #[error("remote state unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote state request failed with {status}: {snippet}")]
    Remote { status: StatusCode, snippet: String },
}

impl StoreError {
    pub fn remote(status: StatusCode, body: &str) -> Self {
        StoreError::Remote {
            status,
            snippet: snippet(body),
        }
    }
}

/// Cut a response body down to something that fits in a log line.
pub fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_long_bodies() {
        let body = "x".repeat(500);
        let s = snippet(&body);
        assert_eq!(s.chars().count(), SNIPPET_LEN + 1);
        assert!(s.ends_with('…'));
    }

    #[test]
    fn not_found_is_its_own_variant() {
        assert!(matches!(
            FetchError::protocol(StatusCode::NOT_FOUND, "missing"),
            FetchError::NotFound
        ));
        assert!(matches!(
            FetchError::protocol(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            FetchError::Protocol { .. }
        ));
    }
}
