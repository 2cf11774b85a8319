#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] wireloom_core::Error),
    #[error("bad stream config: {0}")]
    Config(String),
    #[error("malformed stream wire message: {0}")]
    Wire(String),
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
