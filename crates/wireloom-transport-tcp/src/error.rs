//! Crate-local error enum (§1a "Error handling"), converted into
//! `wireloom_core::Error` at every `Channel` trait boundary since the trait's
//! methods are fixed to `wireloom_core::error::Result`.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] wireloom_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad tcp config: {0}")]
    Config(String),

    #[error("frame too large for this frame variant: {0} bytes")]
    FrameTooLarge(usize),

    #[error("pub handshake failed: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for wireloom_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(c) => c,
            other => wireloom_core::Error::Protocol(other.to_string()),
        }
    }
}
