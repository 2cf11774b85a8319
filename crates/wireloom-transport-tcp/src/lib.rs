//! Framed TCP channels, the accept server, and the pub broadcast
//! server/client (components F and G over TCP, §4.3).
//!
//! `register(&ctx)` installs the `tcp` and `pub+tcp` protocol tags; the
//! `mode` URL key (`server`|`client`, default `client`) picks the listening
//! or dialing implementation, matching the source's single-binary-two-roles
//! convention for these transports.

pub mod error;
pub mod frame;
pub mod pub_client;
pub mod pub_server;
pub mod server;
pub mod socket;

pub use error::Error;
pub use frame::{Frame, FrameHeader};
pub use pub_client::PubClient;
pub use pub_server::PubServer;
pub use server::TcpServer;
pub use socket::TcpChannel;

use wireloom_core::channel::Channel;
use wireloom_core::config::Config;
use wireloom_core::context::Context;

pub fn register(ctx: &Context) {
    ctx.register_factory(
        "tcp",
        std::sync::Arc::new(|name: &str, cfg: &Config| {
            let host = cfg.get("tll.host").unwrap_or("").to_string();
            let channel: Box<dyn Channel + Send> = if cfg.get("mode") == Some("server") {
                Box::new(TcpServer::new(name, "tcp", &host, cfg))
            } else {
                Box::new(TcpChannel::new_client(name, "tcp", &host, cfg))
            };
            Ok(channel)
        }),
    );

    ctx.register_factory(
        "pub+tcp",
        std::sync::Arc::new(|name: &str, cfg: &Config| {
            let host = cfg.get("tll.host").unwrap_or("").to_string();
            let channel: Box<dyn Channel + Send> = if cfg.get("mode") == Some("server") {
                Box::new(PubServer::new(name, "pub+tcp", &host, cfg))
            } else {
                Box::new(PubClient::new(name, "pub+tcp", &host, cfg))
            };
            Ok(channel)
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
        assert!(ctx.has_factory("tcp"));
        assert!(ctx.has_factory("pub+tcp"));
    }
}
