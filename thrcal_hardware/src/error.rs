use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("front-end timeout")]
    Timeout,
    #[error("no response from channel {0}")]
    NoResponse(u8),
    #[error("channel {0} does not exist on this device")]
    NoSuchChannel(u8),
    #[error("invalid simulation model: {0}")]
    InvalidModel(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
