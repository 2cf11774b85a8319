//! Process-wide registry of channels, protocol implementations, alias
//! protocols, and the scheme cache. Constructed once per process, refcounted
//! so channels and the processor can share it cheaply (§3 Data Model).

use crate::channel::Channel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::scheme::Scheme;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a channel from its name and resolved config, registered once per
/// protocol tag (§3 Data Model: "protocol registry"). Returning a boxed
/// trait object keeps `wireloom-core` free of any dependency on the
/// transport crates that supply the closures.
pub type ChannelFactory = Arc<dyn Fn(&str, &Config) -> Result<Box<dyn Channel + Send>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    /// Channel names currently registered, used to reject duplicates and to
    /// resolve `channel://name` scheme URLs.
    channel_names: RwLock<std::collections::HashSet<String>>,
    /// protocol tag -> URL template, e.g. `pub+mem -> mem+pub://`.
    aliases: RwLock<HashMap<String, String>>,
    scheme_cache: RwLock<HashMap<String, Scheme>>,
    /// protocol tag (the URL scheme before `://`) -> constructor, populated
    /// by each transport crate's `register(&Context)` entry point.
    factories: RwLock<HashMap<String, ChannelFactory>>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn register_name(&self, name: &str) -> Result<()> {
        let mut names = self.inner.channel_names.write();
        if !names.insert(name.to_string()) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn unregister_name(&self, name: &str) {
        self.inner.channel_names.write().remove(name);
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.inner.channel_names.read().contains(name)
    }

    pub fn register_alias(&self, tag: &str, template: &str) {
        self.inner
            .aliases
            .write()
            .insert(tag.to_string(), template.to_string());
    }

    pub fn resolve_alias(&self, tag: &str) -> Option<String> {
        self.inner.aliases.read().get(tag).cloned()
    }

    /// Resolves and caches a scheme loaded from a URL or a `channel://name`
    /// reference (§3 Data Model: "stealing scheme from a live channel" — the
    /// live channel is expected to have pre-registered its scheme under its
    /// own name via [`Context::cache_scheme`] before another channel can
    /// reference it).
    pub fn load_scheme(&self, url: &str) -> Result<Scheme> {
        if let Some(cached) = self.inner.scheme_cache.read().get(url) {
            return Ok(cached.clone());
        }
        let scheme = if let Some(path) = url.strip_prefix("yaml://") {
            let text = std::fs::read_to_string(path).map_err(Error::Transport)?;
            Scheme::from_yaml_str(&text)?
        } else if let Some(name) = url.strip_prefix("channel://") {
            self.inner
                .scheme_cache
                .read()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Scheme(format!("no cached scheme for channel `{name}`")))?
        } else {
            return Err(Error::Scheme(format!("unsupported scheme url `{url}`")));
        };
        self.inner
            .scheme_cache
            .write()
            .insert(url.to_string(), scheme.clone());
        Ok(scheme)
    }

    pub fn cache_scheme(&self, key: &str, scheme: Scheme) {
        self.inner.scheme_cache.write().insert(key.to_string(), scheme);
    }

    /// Registers the constructor for a protocol tag. A later registration
    /// for the same tag replaces the earlier one, matching a transport crate
    /// being reloaded in process (tests exercise this; production processes
    /// register each tag once at startup).
    pub fn register_factory(&self, proto: &str, factory: ChannelFactory) {
        self.inner.factories.write().insert(proto.to_string(), factory);
    }

    pub fn has_factory(&self, proto: &str) -> bool {
        self.inner.factories.read().contains_key(proto)
    }

    /// Builds `name` from `config.url`'s protocol tag, per §4.5 step 4
    /// ("instantiate channels in depth order"). `url` must already be
    /// parsed into `config`'s `tll.proto` key by the caller.
    pub fn create_channel(&self, name: &str, proto: &str, config: &Config) -> Result<Box<dyn Channel + Send>> {
        let factory = self
            .inner
            .factories
            .read()
            .get(proto)
            .cloned()
            .ok_or_else(|| Error::UnknownProtocol(proto.to_string()))?;
        factory(name, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_rejected() {
        let ctx = Context::new();
        ctx.register_name("a").unwrap();
        assert!(matches!(ctx.register_name("a"), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn channel_scheme_reference_resolves_after_caching() {
        let ctx = Context::new();
        let scheme = Scheme::builder().build();
        ctx.cache_scheme("producer", scheme);
        assert!(ctx.load_scheme("channel://producer").is_ok());
        assert!(ctx.load_scheme("channel://missing").is_err());
    }

    #[test]
    fn unregistered_protocol_is_reported() {
        let ctx = Context::new();
        let err = ctx.create_channel("c1", "nope", &crate::config::Config::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownProtocol(p) if p == "nope"));
    }
}
