use thiserror::Error;

#[derive(Debug, Error)]
pub enum FableError {
    #[error("provider api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("provider call exceeded {0}s")]
    ProviderTimeout(u64),
}

pub type Result<T> = std::result::Result<T, FableError>;
