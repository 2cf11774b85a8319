use super::callback::{Callback, CallbackHandle, CallbackRegistry};
use super::dcap::{Dcaps, DynCap};
use super::state::State;
use super::{DumpMode, PostPolicy, StaticCaps};
use crate::config::Config;
use crate::message::{Message, MsgMask, Peer};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

/// Key used to merge re-registered callbacks, per §4.1's
/// "(callback, user) identity" contract, now an explicit caller-supplied
/// token rather than a function pointer.
pub type CallbackKey = u64;

/// The lifecycle state machine, dcaps, callback fan-out, and config subtree
/// shared by every channel implementation. Transports hold one of these and
/// delegate `open`/`process`/`post`/`close` bookkeeping to it.
pub struct ChannelBase {
    name: String,
    proto: String,
    static_caps: StaticCaps,
    state: State,
    dcaps: AtomicU8,
    fd: Option<i32>,
    parent: Option<String>,
    dump: DumpMode,
    post_opening: PostPolicy,
    post_closing: PostPolicy,
    config: Config,
    callbacks: CallbackRegistry<CallbackKey>,
    /// Messages produced by state transitions / dcap changes this step, to
    /// be drained by the owning event loop or processor after the call that
    /// produced them returns.
    pending_meta: Vec<Message>,
}

impl std::fmt::Debug for ChannelBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBase")
            .field("name", &self.name)
            .field("proto", &self.proto)
            .field("state", &self.state)
            .field("dcaps", &self.dcaps())
            .finish()
    }
}

impl ChannelBase {
    pub fn new(name: impl Into<String>, proto: impl Into<String>, static_caps: StaticCaps) -> Self {
        let name = name.into();
        ChannelBase {
            name,
            proto: proto.into(),
            static_caps,
            state: State::Closed,
            dcaps: AtomicU8::new(0),
            fd: None,
            parent: None,
            dump: DumpMode::Disable,
            post_opening: PostPolicy::Disable,
            post_closing: PostPolicy::Disable,
            config: Config::new(),
            callbacks: CallbackRegistry::new(),
            pending_meta: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn proto(&self) -> &str {
        &self.proto
    }

    pub fn static_caps(&self) -> StaticCaps {
        self.static_caps
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn dcaps(&self) -> Dcaps {
        Dcaps::from_bits_truncate(self.dcaps.load(Ordering::Acquire))
    }

    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn dump_mode(&self) -> DumpMode {
        self.dump
    }

    pub fn set_dump_mode(&mut self, mode: DumpMode) {
        self.dump = mode;
    }

    pub fn set_post_opening_policy(&mut self, p: PostPolicy) {
        self.post_opening = p;
    }

    pub fn post_opening_policy(&self) -> PostPolicy {
        self.post_opening
    }

    pub fn set_post_closing_policy(&mut self, p: PostPolicy) {
        self.post_closing = p;
    }

    pub fn post_closing_policy(&self) -> PostPolicy {
        self.post_closing
    }

    pub fn set_parent(&mut self, parent: Option<String>) {
        self.parent = parent;
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Sets the fd and emits a `CHANNEL_UPDATE_FD` meta-message so the loop
    /// can add/remove it from the multiplexer.
    pub fn set_fd(&mut self, fd: Option<i32>) {
        self.fd = fd;
        self.pending_meta
            .push(Message::channel_meta(crate::message::channel_meta::UPDATE_FD, Vec::new()));
    }

    /// Transitions the state machine, validating the move and emitting a
    /// `State` message to every callback *before* returning (§4.1).
    pub fn set_state(&mut self, new_state: State) -> crate::error::Result<()> {
        State::validate_transition(self.state, new_state)?;
        let old = self.state;
        self.state = new_state;
        self.config.set(&format!("{}.state", self.name), format!("{new_state:?}"));
        info!(channel = %self.name, from = ?old, to = ?new_state, "state transition");
        let msg = Message::state(new_state as i32);
        self.callbacks.dispatch(&msg);
        Ok(())
    }

    /// Updates dcaps, emitting a `ChannelUpdate` meta-message carrying the
    /// old value as payload so the loop can re-arm (§4.1).
    pub fn set_dcaps(&mut self, new: Dcaps) {
        let old = self.dcaps();
        if old == new {
            return;
        }
        self.dcaps.store(new.bits(), Ordering::Release);
        debug!(channel = %self.name, ?old, ?new, "dcaps changed");
        let change = DynCap { old, new };
        let mut payload = Vec::with_capacity(2);
        payload.push(change.old.bits());
        payload.push(change.new.bits());
        self.pending_meta
            .push(Message::channel_meta(crate::message::channel_meta::UPDATE, payload));
    }

    pub fn add_dcaps(&mut self, extra: Dcaps) {
        self.set_dcaps(self.dcaps() | extra);
    }

    pub fn remove_dcaps(&mut self, mask: Dcaps) {
        self.set_dcaps(self.dcaps() & !mask);
    }

    /// Drains the meta-messages accumulated since the last drain. The event
    /// loop calls this after every `process()`/`open()`/`close()` step.
    pub fn drain_meta(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.pending_meta)
    }

    pub fn add_data_callback(&mut self, key: CallbackKey, cb: Callback) -> CallbackHandle {
        self.callbacks.add_data(key, cb)
    }

    pub fn add_callback(&mut self, key: CallbackKey, mask: MsgMask, cb: Callback) -> CallbackHandle {
        self.callbacks.add(key, mask, cb)
    }

    pub fn remove_callback(&mut self, key: &CallbackKey) {
        self.callbacks.remove(key);
    }

    pub fn dispatch(&mut self, msg: &Message) {
        self.callbacks.dispatch(msg);
    }

    pub fn emit_data(&mut self, msgid: i32, seq: i64, addr: Peer, data: Vec<u8>) {
        let msg = Message::data(msgid, seq, data).with_addr(addr);
        self.dispatch(&msg);
    }

    pub fn emit_control(&mut self, msgid: i32, addr: Peer, data: Vec<u8>) {
        let msg = Message::control(msgid, data).with_addr(addr);
        self.dispatch(&msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcap_change_emits_meta_with_old_value() {
        let mut base = ChannelBase::new("c1", "test", StaticCaps::INPUT);
        base.set_dcaps(Dcaps::POLLIN | Dcaps::PROCESS);
        let meta = base.drain_meta();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].msgid, crate::message::channel_meta::UPDATE);
        assert_eq!(meta[0].data[0], 0);
    }

    #[test]
    fn state_transition_validates() {
        let mut base = ChannelBase::new("c1", "test", StaticCaps::INPUT);
        assert!(base.set_state(State::Opening).is_ok());
        assert!(base.set_state(State::Active).is_ok());
        assert!(base.set_state(State::Opening).is_err());
    }
}
