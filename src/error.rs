use thiserror::Error;

/// Failures internal to the relay. Adapters log these and keep running;
/// none of them terminate a host task.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures at the backend-collaborator boundary. `Status` is a clean
/// non-success response; `Transport` and `Timeout` collapse to the
/// transient-failure outcome at the engine.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend responded with status {0}")]
    Status(u16),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("call timed out")]
    Timeout,
}
