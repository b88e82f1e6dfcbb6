use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("STOMP protocol error: {0}")]
    StompError(String),

    #[error("Access to the log endpoint was rejected ({0})")]
    Unauthorized(reqwest::StatusCode),

    #[error("Server returned unexpected status: {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}

pub type Result<T> = std::result::Result<T, ViewerError>;
