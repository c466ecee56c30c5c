use thiserror::Error;

use crate::venue::VenueError;

#[derive(Debug, Error)]
pub enum MmError {
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("pong timeout")]
    PongTimeout,

    #[error("stale connection: {0}ms since last message")]
    StaleConnection(u64),
}

impl From<tokio_tungstenite::tungstenite::Error> for MmError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        MmError::WebSocket(Box::new(e))
    }
}
