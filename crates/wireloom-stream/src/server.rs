//! The stream server: owns the durable history and answers each connecting
//! client's replay request before streaming live posts to it. Grounded on
//! `original_source/src/channel/stream-server.cc`'s `StreamServer`/`Client`,
//! with the per-client storage-reader sub-channel collapsed into a single
//! shared [`DataRing`] plus one [`RingCursor`] per client — the same
//! ring+cursor idiom `wireloom-transport-tcp`'s `PubServer` already uses for
//! its broadcast fan-out, reused here for history rather than just the live
//! tail. `storage`/`blocks` are therefore in-process state rather than
//! pluggable sub-channels (documented simplification, see DESIGN.md).

use crate::control;
use crate::wire::{self, RequestData};
use crate::{install_inbox, Inbox};
use std::collections::HashMap;
use wireloom_core::channel::{check_post_allowed, Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::context::Context;
use wireloom_core::message::{stream_proto, tcp_control, Message, MsgType, Peer};
use wireloom_core::ring::data::{DataRing, Lookup, RingCursor};
use wireloom_core::Result as CoreResult;

enum ClientState {
    Streaming(RingCursor),
}

struct ClientEntry {
    name: String,
    state: ClientState,
}

pub struct StreamServer {
    base: ChannelBase,
    request: Box<dyn Channel + Send>,
    request_inbox: Inbox,
    storage: DataRing,
    blocks: HashMap<String, Vec<i64>>,
    clients: HashMap<Peer, ClientEntry>,
    last_seq: i64,
    autoseq: bool,
    init_message: Option<(i32, i64)>,
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("base", &self.base)
            .field("last_seq", &self.last_seq)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl StreamServer {
    pub fn new(ctx: &Context, name: &str, proto: &str, cfg: &Config) -> wireloom_core::Result<StreamServer> {
        let mut base = ChannelBase::new(name, proto, StaticCaps::OUTPUT | StaticCaps::PARENT | StaticCaps::LONG_CLOSE);
        *base.config_mut() = cfg.clone();

        let request_cfg = cfg
            .sub("request")
            .ok_or_else(|| wireloom_core::Error::from(crate::error::Error::Config("missing `request` sub-config".into())))?;
        let request_proto = request_cfg
            .get("tll.proto")
            .ok_or_else(|| wireloom_core::Error::from(crate::error::Error::Config("missing request.tll.proto".into())))?;
        let mut request = ctx.create_channel(&format!("{name}.request"), request_proto, &request_cfg)?;
        request.base_mut().set_parent(Some(name.to_string()));
        let request_inbox = install_inbox(request.base_mut());

        let size: usize = cfg.get("size").and_then(crate::parse_size).unwrap_or(1024 * 1024);
        let init_message = cfg
            .get("init-message")
            .and_then(|s| s.parse::<i32>().ok())
            .map(|msgid| (msgid, cfg.get("init-seq").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0)));

        Ok(StreamServer {
            base,
            request,
            request_inbox,
            storage: DataRing::new(size),
            blocks: HashMap::new(),
            clients: HashMap::new(),
            last_seq: -1,
            autoseq: cfg.get_bool("autoseq", false),
            init_message,
        })
    }

    fn resolve_block(&self, name: &str, index: i64) -> Option<(i64, i64)> {
        let marks = self.blocks.get(name)?;
        let idx = usize::try_from(index).ok()?;
        let seq = *marks.get(idx)?;
        let end = marks.get(idx + 1).copied().unwrap_or(self.last_seq + 1);
        Some((seq, end))
    }

    fn handle_request(&mut self, peer: Peer, req_bytes: &[u8]) -> wireloom_core::Result<()> {
        let req = wire::decode_request(req_bytes).map_err(wireloom_core::Error::from)?;
        if req.version != wire::VERSION {
            let err = wire::encode_error(&wire::ErrorReply { text: format!("unsupported client version {}", req.version) });
            let msg = Message::data(stream_proto::ERROR, 0, err).with_addr(peer);
            return self.request.post(&msg);
        }

        let (requested_seq, block_seq) = match req.data {
            RequestData::Seq(seq) => (seq as i64, -1),
            RequestData::Block { name, index } => match self.resolve_block(&name, index) {
                Some((seq, end)) => (seq, end),
                None => {
                    let err = wire::encode_error(&wire::ErrorReply { text: format!("unknown block '{name}' index {index}") });
                    let msg = Message::data(stream_proto::ERROR, 0, err).with_addr(peer);
                    return self.request.post(&msg);
                }
            },
        };

        tracing::info!(channel = %self.base.name(), client = %req.client, seq = requested_seq, "stream client request");

        self.clients.insert(
            peer,
            ClientEntry { name: req.client, state: ClientState::Streaming(RingCursor { next_seq: requested_seq }) },
        );

        let reply = wire::encode_reply(&wire::Reply { last_seq: self.last_seq, requested_seq, block_seq });
        let msg = Message::data(stream_proto::REPLY, 0, reply).with_addr(peer);
        self.request.post(&msg)
    }

    fn drop_client(&mut self, peer: Peer) {
        if let Some(c) = self.clients.remove(&peer) {
            tracing::info!(channel = %self.base.name(), client = %c.name, "stream client disconnected");
        }
    }

    fn service_clients(&mut self) -> wireloom_core::Result<bool> {
        let mut progressed = false;
        let peers: Vec<Peer> = self.clients.keys().copied().collect();
        for peer in peers {
            let cursor = match self.clients.get(&peer).map(|c| &c.state) {
                Some(ClientState::Streaming(cursor)) => *cursor,
                _ => continue,
            };
            match self.storage.lookup(cursor) {
                Lookup::Empty => {}
                Lookup::OutOfData => {
                    let err = wire::encode_error(&wire::ErrorReply { text: "client fell behind retained history".into() });
                    let msg = Message::data(stream_proto::ERROR, 0, err).with_addr(peer);
                    let _ = self.request.post(&msg);
                    self.drop_client(peer);
                    progressed = true;
                }
                Lookup::Frame(frame) => {
                    let msg = Message::data(frame.msgid, frame.seq, frame.payload.clone()).with_addr(peer);
                    self.request.post(&msg)?;
                    if let Some(entry) = self.clients.get_mut(&peer) {
                        entry.state = ClientState::Streaming(RingCursor { next_seq: frame.seq + 1 });
                    }
                    progressed = true;
                }
            }
        }
        Ok(progressed)
    }

    pub fn register_block(&mut self, name: &str) {
        let marks = self.blocks.entry(name.to_string()).or_default();
        marks.push(self.last_seq + 1);
    }
}

impl Channel for StreamServer {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> CoreResult<()> {
        self.base.set_state(State::Opening)?;
        if self.storage.is_empty() {
            if let Some((msgid, seq)) = self.init_message {
                tracing::info!(channel = %self.base.name(), msgid, seq, "seeding empty storage with init message");
                self.storage.push(seq, msgid, Vec::new());
                self.last_seq = seq;
                if let Some(init_block) = self.base.config().get("init-block").map(|s| s.to_string()) {
                    self.register_block(&init_block);
                }
            }
        }
        self.request.open()?;
        self.base.add_dcaps(Dcaps::PROCESS | Dcaps::PENDING);
        Ok(())
    }

    fn process(&mut self) -> CoreResult<bool> {
        let mut progressed = false;
        if matches!(self.request.base().state(), State::Opening | State::Active) {
            progressed |= self.request.process()?;
        }
        if self.request.base().state() == State::Active && self.base.state() == State::Opening {
            self.base.set_state(State::Active)?;
        }

        let request_msgs: Vec<Message> = self.request_inbox.lock().unwrap().drain(..).collect();
        if !request_msgs.is_empty() {
            progressed = true;
        }
        drain_request_channel(self, request_msgs)?;

        progressed |= self.service_clients()?;

        if self.base.state() == State::Closing && self.request.base().state() == State::Closed {
            self.base.set_state(State::Closed)?;
            progressed = true;
        }
        Ok(progressed)
    }

    fn post(&mut self, msg: &Message) -> CoreResult<()> {
        check_post_allowed(&self.base)?;
        match msg.ty {
            MsgType::Data => {
                let seq = if self.autoseq { self.last_seq + 1 } else { msg.seq };
                self.storage.push(seq, msg.msgid, msg.data.clone());
                self.last_seq = seq;
                Ok(())
            }
            MsgType::Channel if msg.msgid == control::BLOCK_MARKER => {
                let name = String::from_utf8_lossy(&msg.data).to_string();
                self.register_block(&name);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn close(&mut self, force: bool) -> CoreResult<()> {
        let force = force || self.base.state() == State::Error;
        if !matches!(self.request.base().state(), State::Closed) {
            self.request.close(force)?;
        }
        if self.base.state() == State::Active || self.base.state() == State::Opening {
            self.base.set_state(State::Closing)?;
        }
        if force && self.base.state() == State::Closing {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}

/// Handles the request channel's fan-out directly: this method is called by
/// the event loop (or by tests) once per step, after `process()`, to react
/// to `Request`/`ClientDone` data and `Disconnect` control messages that
/// arrived on the request channel since the last drain. Kept as a free
/// function taking the specific borrowed pieces it needs rather than a
/// `&mut self` method, because the caller already holds `&mut
/// self.request` disjointly from the rest of `self` while draining its
/// inbox (same disjoint-borrow shape documented for
/// `wireloom-transport-tcp::pub_server::service_one`).
pub fn drain_request_channel(server: &mut StreamServer, messages: Vec<Message>) -> wireloom_core::Result<()> {
    for msg in messages {
        match msg.ty {
            MsgType::Data if msg.msgid == stream_proto::REQUEST || msg.msgid == stream_proto::REQUEST_LEGACY => {
                if let Err(e) = server.handle_request(msg.addr, &msg.data) {
                    tracing::warn!(channel = %server.base.name(), error = %e, "failed to handle stream request");
                }
            }
            MsgType::Data if msg.msgid == stream_proto::CLIENT_DONE => {
                server.drop_client(msg.addr);
            }
            MsgType::Control if msg.msgid == tcp_control::DISCONNECT => {
                server.drop_client(msg.addr);
            }
            _ => {}
        }
    }
    Ok(())
}
