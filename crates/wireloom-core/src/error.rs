use crate::channel::State;

/// Stable error domain shared by every part of the runtime.
///
/// Mirrors the shape of a stable-code-plus-cause error (channels never swallow
/// a failure silently, per the propagation policy of every caller) but is
/// expressed as a plain `thiserror` enum rather than a hand-rolled `Error`
/// trait object, since this crate targets `std` directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    Url(String),

    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),

    #[error("unknown protocol `{0}`")]
    UnknownProtocol(String),

    #[error("duplicate channel name `{0}`")]
    DuplicateName(String),

    #[error("unknown channel `{0}`")]
    UnknownChannel(String),

    #[error("dependency cycle: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("invalid state for this operation: expected {expected}, found {found:?}")]
    InvalidState {
        expected: &'static str,
        found: State,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("ring iterator invalidated, writer overwrote unread data")]
    RingInvalidated,

    #[error("ring message too large for configured size")]
    RingMessageTooLarge,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("scheme error: {0}")]
    Scheme(String),

    #[error("out of data: client fell behind the ring")]
    OutOfData,

    #[error("channel `{0}` has no file descriptor")]
    NoFd(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
