//! Crate-local error type, converted into [`wireloom_core::Error`] at the
//! `Channel` trait boundary (the fixed return type every transport crate
//! must produce) exactly as `wireloom-transport-tcp::error` does.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] wireloom_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad udp config: {0}")]
    Config(String),

    #[error("datagram too large for header: {0} bytes")]
    DatagramTooSmall(usize),
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
