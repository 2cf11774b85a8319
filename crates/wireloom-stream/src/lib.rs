//! The stream replay+live protocol (§4.4): a client that requests durable
//! history from a server and transparently joins the server's live feed once
//! caught up, with no gap and no duplicate between the replayed tail and the
//! first live message.
//!
//! `register(&ctx)` installs `stream+server` and `stream+client`. Both
//! compose their sub-channels (`live`/`request` for the client, `request`
//! for the server) generically through [`Context::create_channel`], reading
//! a `tll.proto` key out of the matching config subtree — the same
//! `context().channel(url, master)` composition the source uses, so the
//! transport backing those sub-channels is not baked into this crate.

pub mod client;
pub mod control;
pub mod error;
pub mod server;
pub mod wire;

pub use client::StreamClient;
pub use error::Error;
pub use server::StreamServer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use wireloom_core::channel::ChannelBase;
use wireloom_core::config::Config;
use wireloom_core::context::Context;
use wireloom_core::message::{Message, MsgMask};

/// Shared queue a parent channel drains at the top of its own `process()` to
/// see the Data/Control/State traffic its child channel dispatched since the
/// last drain. `ChannelBase::dispatch` fans messages out synchronously to
/// registered callbacks, so the parent cannot hold `&mut self` across that
/// call; the callback instead stashes a clone here for the parent to collect
/// once it has given up its borrow of the child. `Callback` requires `Send`,
/// so this is `Arc<Mutex<..>>` rather than the cheaper `Rc<RefCell<..>>` one
/// might reach for in a single-threaded design.
pub(crate) type Inbox = Arc<Mutex<VecDeque<Message>>>;

/// Registers an inbox callback on `base` and returns the shared handle.
/// Every sub-channel owned directly by `StreamClient`/`StreamServer` gets
/// one of these instead of a back-pointer to its parent.
pub(crate) fn install_inbox(base: &mut ChannelBase) -> Inbox {
    static NEXT_KEY: AtomicU64 = AtomicU64::new(1);
    let inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));
    let sink = inbox.clone();
    let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    base.add_callback(
        key,
        MsgMask::ALL,
        Box::new(move |msg: &Message| {
            sink.lock().unwrap().push_back(msg.clone());
        }),
    );
    inbox
}

/// `kb`/`mb`-suffixed size parsing, matching
/// `wireloom-transport-tcp::pub_server`'s `size` config key.
pub(crate) fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("kb") {
        n.parse::<usize>().ok().map(|v| v * 1024)
    } else if let Some(n) = s.strip_suffix("mb") {
        n.parse::<usize>().ok().map(|v| v * 1024 * 1024)
    } else {
        s.parse().ok()
    }
}

pub fn register(ctx: &Context) {
    let client_ctx = ctx.clone();
    ctx.register_factory(
        "stream+client",
        std::sync::Arc::new(move |name: &str, cfg: &Config| {
            let channel = client::StreamClient::new(&client_ctx, name, "stream+client", cfg)?;
            Ok(Box::new(channel) as Box<dyn wireloom_core::channel::Channel + Send>)
        }),
    );

    let server_ctx = ctx.clone();
    ctx.register_factory(
        "stream+server",
        std::sync::Arc::new(move |name: &str, cfg: &Config| {
            let channel = server::StreamServer::new(&server_ctx, name, "stream+server", cfg)?;
            Ok(Box::new(channel) as Box<dyn wireloom_core::channel::Channel + Send>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_installs_both_protocol_tags() {
        let ctx = Context::new();
        register(&ctx);
        assert!(ctx.has_factory("stream+client"));
        assert!(ctx.has_factory("stream+server"));
    }

    #[test]
    fn parse_size_handles_suffixes() {
        assert_eq!(parse_size("64kb"), Some(64 * 1024));
        assert_eq!(parse_size("2mb"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("100"), Some(100));
    }
}
