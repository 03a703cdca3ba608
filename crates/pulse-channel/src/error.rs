use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to encode broadcast message: {0}")]
    Encode(String),

    #[error("malformed broadcast message: {0}")]
    Decode(String),

    #[error("unexpected broadcast payload: {0}")]
    Payload(String),
}
