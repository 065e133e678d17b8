//! Crate-wide error type.
//!
//! Internal code returns [`Error`]; the binary entry point (`src/main.rs`)
//! wraps these in `anyhow::Result` at the outermost frame, where `anyhow`'s
//! formatting and `clap`'s exit-code conventions take over.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),

    // --------------------------------- socket / cancellation ---------------------------------------
    #[error("operation cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid socket address {0:?}: {1}")]
    ConfigError(String, String),

    // --------------------------------- TLS -------------------------------------------------------
    #[error("TLS error: {0}")]
    TlsError(String),

    // --------------------------------- DAP wire codec ---------------------------------------------
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("message seq {got} out of sequence, expected {expected}")]
    OutOfSequence { expected: i64, got: i64 },
    #[error("unknown {kind} identifier {id:?}")]
    UnknownMessage { kind: &'static str, id: String },
    #[error("malformed DAP message: {0}")]
    MalformedMessage(String),

    // --------------------------------- broker / debuggee --------------------------------------------
    #[error("debuggee disconnected: {0}")]
    DebuggeeDisconnected(String),
    #[error("strategy error: {0}")]
    StrategyError(String),
    #[error("template error: {0}")]
    TemplateError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::TlsError(e.to_string())
    }
}
