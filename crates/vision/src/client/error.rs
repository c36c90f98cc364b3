use thiserror::Error;

/// Failures surfaced by the client building blocks.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to encode frame as JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error("failed to decode processed image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("invalid server response: {0}")]
    InvalidResponse(String),
    #[error("fullscreen request rejected: {0}")]
    Fullscreen(String),
    #[error("worker thread is not running")]
    WorkerUnavailable,
}
