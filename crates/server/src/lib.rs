//! Voice back-office server
//!
//! WebSocket session manager and HTTP surface. The session manager is the
//! only component that writes to a client; every outbound envelope rides one
//! ordered channel per connection.

pub mod http;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use protocol::{ClientFrame, Envelope, ServerEvent};
pub use session::{PipelineState, Session, SessionManager, TtsChoice};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
