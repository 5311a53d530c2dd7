//! Provider-neutral messaging abstractions (Telegram today).

pub mod port;
pub mod throttled;
pub mod types;
