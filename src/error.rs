//! Error kinds for the relay, matching the behavioural categories from the
//! sync engine's error handling design: session-level failures bubble up
//! and terminate the run, per-cycle failures are caught at the sync-engine
//! boundary so one bad game never poisons the poll loop.

use thiserror::Error;

/// Top-level error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Login returned a non-success HTTP status. Fatal.
    #[error("login failed: {0}")]
    AuthFailure(String),

    /// A study or chapter HTTP fetch returned a non-success status.
    #[error("study unavailable: {0}")]
    StudyUnavailable(String),

    /// The authenticated user is not a contributor (role "w") on the study.
    #[error("not a contributor to this study")]
    NotAContributor,

    /// The websocket closed or errored; the run cannot continue.
    #[error("lost connection to the study socket")]
    TransportLost,

    /// PGN text failed to parse, or the game has no mainline yet.
    #[error("malformed PGN: {0}")]
    MalformedPgn(String),

    /// A null move (or otherwise unencodable move) reached the path codec.
    #[error("unsupported move: {0}")]
    UnsupportedMove(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
