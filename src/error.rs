use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum Error {
    /// No confirming frame arrived within the frame's ack timeout.
    #[error("command not acknowledged: {0}")]
    AckTimeout(Box<Frame>),
    /// Rejected while building a command; never reaches the wire.
    #[error("invalid command: {0}")]
    Precondition(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("link closed")]
    Closed,
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
