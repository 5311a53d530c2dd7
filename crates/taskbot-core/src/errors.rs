/// Core error type for the delivery subsystem.
///
/// Ordinary delivery failures (network errors, rejected credentials, rate limits) are not
/// errors: gateways report them as `Ok(false)` or an empty batch. This type covers
/// conditions the caller has to act on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
