//! The channel abstraction and its lifecycle contract (component D).
//!
//! Every transport in this workspace (TCP, UDP, memring, the pub broadcast
//! pair, the stream replay+live pair) implements [`Channel`] on top of a
//! shared [`ChannelBase`], which owns the state machine, dcaps, and callback
//! fan-out so that transports only have to implement `open`/`process`/`post`/
//! `close` and let the base handle the rest.

mod base;
mod callback;
mod dcap;
mod state;

pub use base::ChannelBase;
pub use callback::{Callback, CallbackHandle, CallbackRegistry};
pub use dcap::{Dcaps, DynCap};
pub use state::State;

use crate::error::{Error, Result};
use crate::message::{Message, Peer};
use std::fmt;

bitflags::bitflags! {
    /// Static capabilities declared at construction time and never changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StaticCaps: u8 {
        const INPUT      = 0b0000_0001;
        const OUTPUT     = 0b0000_0010;
        const PARENT     = 0b0000_0100;
        const PROXY      = 0b0000_1000;
        const LONG_CLOSE = 0b0001_0000;
    }
}

/// Pretty-print mode selected by the `dump` URL key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpMode {
    #[default]
    Disable,
    Frame,
    Text,
    TextHex,
    Scheme,
    Auto,
}

impl DumpMode {
    pub fn parse(s: &str) -> DumpMode {
        match s {
            "yes" | "frame" => DumpMode::Frame,
            "text" => DumpMode::Text,
            "text+hex" => DumpMode::TextHex,
            "scheme" => DumpMode::Scheme,
            "auto" => DumpMode::Auto,
            _ => DumpMode::Disable,
        }
    }
}

/// Whether `post()` is accepted while the channel is Opening or Closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostPolicy {
    #[default]
    Disable,
    Enable,
}

/// The operation every transport implements; the event loop drives it purely
/// through this trait plus the shared [`ChannelBase`] each implementor holds.
pub trait Channel: fmt::Debug {
    fn base(&self) -> &ChannelBase;
    fn base_mut(&mut self) -> &mut ChannelBase;

    /// Begin opening. Must emit the Opening state transition via
    /// `self.base_mut().set_state(...)` before returning, and either finish
    /// synchronously (emitting Active) or rely on a later `process()` call
    /// to complete the handshake.
    fn open(&mut self) -> Result<()>;

    /// Cooperative step function. Returns `Ok(true)` when work was done and
    /// the caller may call again immediately, `Ok(false)` on EAGAIN (nothing
    /// more to do right now), `Err(_)` on failure (caller transitions the
    /// channel to Error).
    fn process(&mut self) -> Result<bool>;

    /// Send a message. Only valid in `Active` state unless the channel's
    /// post policy allows Opening/Closing, per §4.1.
    fn post(&mut self, msg: &Message) -> Result<()>;

    fn close(&mut self, force: bool) -> Result<()>;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn proto(&self) -> &str {
        self.base().proto()
    }
}

/// Convenience: validates the post-policy/state precondition shared by every
/// transport's `post()` implementation.
pub fn check_post_allowed(base: &ChannelBase) -> Result<()> {
    let state = base.state();
    let allowed = match state {
        State::Active => true,
        State::Opening => base.post_opening_policy() == PostPolicy::Enable,
        State::Closing => base.post_closing_policy() == PostPolicy::Enable,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::InvalidState {
            expected: "Active (or Opening/Closing with post policy enabled)",
            found: state,
        })
    }
}

pub type ChildTag = String;

/// A child channel reference, tagged the way `tll.channel.<tag>` groups them.
#[derive(Debug, Clone)]
pub struct Child {
    pub tag: ChildTag,
    pub name: String,
}

/// Resolve at most the first Proxy child of a channel, per §4.1's
/// `channel_cast<T>` rule. Returns `None` if the channel has no Proxy cap or
/// no children.
pub fn proxy_child<'a>(base: &'a ChannelBase, children: &'a [Child]) -> Option<&'a Child> {
    if !base.static_caps().contains(StaticCaps::PROXY) {
        return None;
    }
    children.first()
}

pub fn default_addr() -> Peer {
    Peer::None
}
