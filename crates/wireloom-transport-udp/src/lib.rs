//! The UDP channel (with multicast) and the mmap-backed pub broadcast
//! server/client (component F's "UDP / memring" half, §4.3).
//!
//! `register(&ctx)` installs `udp` and `pub+mem`; `pub+mem`'s `mode` URL key
//! (`server`|`client`, default `client`) picks the mmap writer or reader.

pub mod dgram;
pub mod error;
pub mod mem_pub_client;
pub mod mem_pub_server;
pub mod socket;

pub use error::Error;
pub use mem_pub_client::PubMemClient;
pub use mem_pub_server::PubMemServer;
pub use socket::{McastOptions, UdpChannel};

use wireloom_core::channel::Channel;
use wireloom_core::config::Config;
use wireloom_core::context::Context;

pub fn register(ctx: &Context) {
    ctx.register_factory(
        "udp",
        std::sync::Arc::new(|name: &str, cfg: &Config| {
            let host = cfg.get("tll.host").unwrap_or("").to_string();
            let channel: Box<dyn Channel + Send> = Box::new(UdpChannel::new(name, "udp", &host, cfg));
            Ok(channel)
        }),
    );

    ctx.register_factory(
        "pub+mem",
        std::sync::Arc::new(|name: &str, cfg: &Config| {
            let host = cfg.get("tll.host").unwrap_or("").to_string();
            let channel: Box<dyn Channel + Send> = if cfg.get("mode") == Some("server") {
                Box::new(PubMemServer::new(name, "pub+mem", &host, cfg))
            } else {
                Box::new(PubMemClient::new(name, "pub+mem", &host, cfg))
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
        assert!(ctx.has_factory("udp"));
        assert!(ctx.has_factory("pub+mem"));
    }
}
