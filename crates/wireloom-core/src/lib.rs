//! Core runtime for the wireloom channel-transport framework: the channel
//! lifecycle and dcap contract, config and scheme trees, the event loop, the
//! two ring data structures, stats, and the dependency-aware processor.
//!
//! Transport crates (TCP, UDP, stream replay+live) depend on this crate and
//! register their protocol tags with a [`Context`] at startup; this crate
//! never depends back on them.

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod evloop;
pub mod message;
pub mod processor;
pub mod ring;
pub mod scheme;
pub mod stat;

pub mod prelude {
    pub use crate::channel::{Channel, ChannelBase, Dcaps, State, StaticCaps};
    pub use crate::config::Config;
    pub use crate::context::Context;
    pub use crate::error::{Error, Result};
    pub use crate::message::{Message, MsgMask, MsgType, Peer};
}

pub use context::Context;
pub use error::{Error, Result};
