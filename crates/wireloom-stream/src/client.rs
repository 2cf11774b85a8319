//! The stream client: joins a live pub feed and, unless `mode=online`,
//! requests a historical replay first. Grounded on
//! `original_source/src/channel/stream-client.cc`'s `StreamClient`, reworked
//! from its callback-driven prefix-channel design into a channel that owns
//! its two children directly and drains them from its own `process()`.

use crate::control;
use crate::error::Error;
use crate::wire::{self, Request, RequestData};
use crate::{install_inbox, Inbox};
use wireloom_core::channel::{check_post_allowed, Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::context::Context;
use wireloom_core::message::{stream_proto, Message, MsgType, Peer};
use wireloom_core::ring::data::DataRing;
use wireloom_core::Result as CoreResult;

/// Client-local sub-state machine (§4.4). Distinct from `ChannelBase`'s own
/// `State`, which only reaches `Active` once the client is functional —
/// `Connected` already counts as functional even though replay is ongoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Closed,
    Opening,
    Connected,
    Overlapped,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Online,
    Seq,
    Block,
}

pub struct StreamClient {
    base: ChannelBase,
    live: Box<dyn Channel + Send>,
    request: Box<dyn Channel + Send>,
    live_inbox: Inbox,
    request_inbox: Inbox,
    state: ClientState,
    ring: DataRing,
    seq: Option<i64>,
    server_seq: Option<i64>,
    block_end: Option<i64>,
    open_seq: Option<i64>,
    mode: Mode,
    client_name: String,
    report_block_end: bool,
    pending_request: Option<Request>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("base", &self.base)
            .field("state", &self.state)
            .finish()
    }
}

impl StreamClient {
    pub fn new(ctx: &Context, name: &str, proto: &str, cfg: &Config) -> wireloom_core::Result<StreamClient> {
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT | StaticCaps::PROXY | StaticCaps::LONG_CLOSE);
        *base.config_mut() = cfg.clone();

        let live_cfg = cfg
            .sub("live")
            .ok_or_else(|| wireloom_core::Error::from(Error::Config("missing `live` sub-config".into())))?;
        let live_proto = live_cfg
            .get("tll.proto")
            .ok_or_else(|| wireloom_core::Error::from(Error::Config("missing live.tll.proto".into())))?;
        let mut live = ctx.create_channel(&format!("{name}.live"), live_proto, &live_cfg)?;
        live.base_mut().set_parent(Some(name.to_string()));
        let live_inbox = install_inbox(live.base_mut());

        let request_cfg = cfg
            .sub("request")
            .ok_or_else(|| wireloom_core::Error::from(Error::Config("missing `request` sub-config".into())))?;
        let request_proto = request_cfg
            .get("tll.proto")
            .ok_or_else(|| wireloom_core::Error::from(Error::Config("missing request.tll.proto".into())))?;
        let mut request = ctx.create_channel(&format!("{name}.request"), request_proto, &request_cfg)?;
        request.base_mut().set_parent(Some(name.to_string()));
        let request_inbox = install_inbox(request.base_mut());

        let size: usize = cfg
            .get("size")
            .and_then(|s| crate::parse_size(s))
            .unwrap_or(128 * 1024);

        Ok(StreamClient {
            base,
            live,
            request,
            live_inbox,
            request_inbox,
            state: ClientState::Closed,
            ring: DataRing::new(size),
            seq: None,
            server_seq: None,
            block_end: None,
            open_seq: None,
            mode: Mode::Online,
            client_name: cfg.get("peer").unwrap_or("").to_string(),
            report_block_end: cfg.get_bool("report-block-end", true),
            pending_request: None,
        })
    }

    fn fail(&mut self, reason: String) -> wireloom_core::Error {
        tracing::warn!(channel = %self.base.name(), %reason, "stream client failing");
        let _ = self.base.set_state(State::Error);
        wireloom_core::Error::Protocol(reason)
    }

    fn report_online(&mut self) {
        tracing::info!(channel = %self.base.name(), seq = ?self.seq, "stream is online");
        self.state = ClientState::Online;
        self.base.emit_control(control::ONLINE, Peer::None, Vec::new());
    }

    fn report_block(&mut self) {
        let end = self.block_end.unwrap_or(-1) - 1;
        tracing::info!(channel = %self.base.name(), block_end = end, "block finished");
        if self.report_block_end {
            let msg = Message::control(control::END_OF_BLOCK, Vec::new()).with_seq(end);
            self.base.dispatch(&msg);
        }
    }

    fn post_done(&mut self, seq: i64) -> wireloom_core::Result<()> {
        let msg = Message::data(stream_proto::CLIENT_DONE, 0, wire::encode_client_done(seq));
        self.request.post(&msg)
    }

    fn on_live_data(&mut self, msg: Message) {
        if self.state == ClientState::Online {
            self.seq = Some(msg.seq);
            self.base.dispatch(&msg);
            return;
        }
        self.ring.push(msg.seq, msg.msgid, msg.data);
    }

    fn on_request_active(&mut self) -> wireloom_core::Result<()> {
        let req = self
            .pending_request
            .take()
            .unwrap_or(Request { version: wire::VERSION, client: self.client_name.clone(), data: RequestData::Seq(0) });
        let payload = wire::encode_request(&req);
        let msg = Message::data(stream_proto::REQUEST, 0, payload);
        self.request.post(&msg)?;
        self.state = ClientState::Opening;
        Ok(())
    }

    fn on_request_error(&mut self) -> wireloom_core::Result<()> {
        if self.state != ClientState::Closed {
            return Err(self.fail("request channel failed".to_string()));
        }
        Ok(())
    }

    fn on_request_closed(&mut self) -> wireloom_core::Result<()> {
        match self.state {
            ClientState::Closed | ClientState::Online | ClientState::Overlapped => Ok(()),
            _ => Err(self.fail("request channel closed unexpectedly".to_string())),
        }
    }

    fn on_request_state(&mut self, code: i32) -> wireloom_core::Result<()> {
        if code == State::Active as i32 {
            self.on_request_active()
        } else if code == State::Error as i32 {
            self.on_request_error()
        } else if code == State::Closed as i32 {
            self.on_request_closed()
        } else {
            Ok(())
        }
    }

    fn on_request_data(&mut self, msg: Message) -> wireloom_core::Result<()> {
        match self.state {
            ClientState::Opening => self.on_reply_or_error(msg),
            ClientState::Connected => self.on_connected_data(msg),
            ClientState::Overlapped => {
                if msg.seq > self.seq.unwrap_or(-1) {
                    self.seq = Some(msg.seq);
                    self.base.dispatch(&msg);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_reply_or_error(&mut self, msg: Message) -> wireloom_core::Result<()> {
        if msg.msgid == stream_proto::ERROR {
            let err = wire::decode_error(&msg.data).map_err(wireloom_core::Error::from)?;
            return Err(self.fail(format!("server error: {}", err.text)));
        }
        if msg.msgid != stream_proto::REPLY {
            return Err(self.fail(format!("unexpected msgid {} from request channel", msg.msgid)));
        }
        let reply = wire::decode_reply(&msg.data).map_err(wireloom_core::Error::from)?;
        self.server_seq = if reply.last_seq < 0 { None } else { Some(reply.last_seq) };
        self.block_end = if reply.block_seq > 0 { Some(reply.block_seq) } else { None };
        self.state = ClientState::Connected;
        self.base.set_state(State::Active)?;
        if self.open_seq.is_none() {
            tracing::info!(channel = %self.base.name(), requested_seq = reply.requested_seq, "translated block request to seq");
            self.open_seq = Some(reply.requested_seq);
        }
        let requested = self.open_seq.unwrap_or(0);
        match self.server_seq {
            None => Err(self.fail(format!("server has no data, can not open from seq {requested}"))),
            Some(s) if s + 1 == requested => {
                self.seq = Some(s);
                if self.block_end.map(|b| b > 0).unwrap_or(false) {
                    self.report_block();
                }
                self.report_online();
                let _ = self.request.close(false);
                Ok(())
            }
            Some(s) if s < requested => Err(self.fail(format!("invalid server seq {s} < requested {requested}"))),
            _ => Ok(()),
        }
    }

    fn on_connected_data(&mut self, msg: Message) -> wireloom_core::Result<()> {
        if let (Some(seq), Some(end)) = (self.seq, self.block_end) {
            if seq < end && msg.seq >= end {
                self.seq = Some(msg.seq);
                self.report_block();
            }
        }
        self.seq = Some(msg.seq);
        self.base.dispatch(&msg);

        if Some(msg.seq) == self.server_seq && self.ring.is_empty() {
            tracing::info!(channel = %self.base.name(), seq = msg.seq, "reached reported server seq, no online data");
            self.post_done(msg.seq)?;
            self.report_online();
            return Ok(());
        }

        if self.ring.is_empty() {
            return Ok(());
        }
        if let Some(front) = self.ring.oldest_seq() {
            if front > msg.seq + 1 {
                return Ok(());
            }
        }
        while let Some(front) = self.ring.oldest_seq() {
            if front <= msg.seq {
                self.ring.pop_front();
            } else {
                break;
            }
        }
        if self.ring.is_empty() || self.ring.used_bytes() * 2 <= self.ring.max_bytes() {
            tracing::info!(channel = %self.base.name(), seq = msg.seq, "request stream overlapping with online buffer");
            self.post_done(msg.seq)?;
            self.base.add_dcaps(Dcaps::PROCESS | Dcaps::PENDING);
            self.state = ClientState::Overlapped;
        }
        Ok(())
    }
}

impl Channel for StreamClient {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> CoreResult<()> {
        self.base.set_state(State::Opening)?;
        self.ring = DataRing::new(self.ring.max_bytes());
        self.state = ClientState::Closed;
        self.seq = None;
        self.server_seq = None;
        self.block_end = None;
        self.open_seq = None;

        let mode_str = self.base.config().get("mode").unwrap_or("").to_string();
        self.mode = match mode_str.as_str() {
            "online" => Mode::Online,
            "block" => Mode::Block,
            _ => Mode::Seq,
        };

        self.pending_request = match self.mode {
            Mode::Online => None,
            Mode::Seq => {
                let seq = self
                    .base
                    .config()
                    .get("seq")
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| wireloom_core::Error::from(Error::Config("mode=seq requires a `seq` parameter".into())))?;
                self.open_seq = Some(seq);
                Some(Request { version: wire::VERSION, client: self.client_name.clone(), data: RequestData::Seq(seq as u64) })
            }
            Mode::Block => {
                let name = self.base.config().get("block").unwrap_or("default").to_string();
                let index = self
                    .base
                    .config()
                    .get("block-index")
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);
                Some(Request { version: wire::VERSION, client: self.client_name.clone(), data: RequestData::Block { name, index } })
            }
        };

        self.live.open()?;
        self.base.add_dcaps(Dcaps::PROCESS | Dcaps::PENDING);
        Ok(())
    }

    fn process(&mut self) -> CoreResult<bool> {
        let mut progressed = false;

        if matches!(self.live.base().state(), State::Opening | State::Active) {
            progressed |= self.live.process()?;
        }
        if matches!(self.request.base().state(), State::Opening | State::Active) {
            progressed |= self.request.process()?;
        }

        let live_msgs: Vec<Message> = self.live_inbox.lock().unwrap().drain(..).collect();
        for msg in live_msgs {
            progressed = true;
            if msg.ty == MsgType::State && msg.msgid == State::Active as i32 && self.state == ClientState::Closed {
                if self.mode == Mode::Online {
                    self.state = ClientState::Online;
                    self.base.set_state(State::Active)?;
                } else {
                    self.request.open()?;
                }
            } else if msg.ty == MsgType::Data {
                self.on_live_data(msg);
            }
        }

        let request_msgs: Vec<Message> = self.request_inbox.lock().unwrap().drain(..).collect();
        for msg in request_msgs {
            progressed = true;
            match msg.ty {
                MsgType::State => self.on_request_state(msg.msgid)?,
                MsgType::Data => self.on_request_data(msg)?,
                _ => {}
            }
        }

        if self.state == ClientState::Overlapped {
            if let Some(frame) = self.ring.pop_front() {
                progressed = true;
                if frame.seq > self.seq.unwrap_or(-1) {
                    self.seq = Some(frame.seq);
                    self.base.emit_data(frame.msgid, frame.seq, Peer::None, frame.payload);
                }
            }
            if self.ring.is_empty() {
                self.report_online();
                self.base.remove_dcaps(Dcaps::PENDING);
            }
        }

        // Cooperative close (§4.1 "long-close channels remain in Closing
        // until their sub-state machines drain"): once both children have
        // wound down, finish the transition to Closed.
        if self.base.state() == State::Closing
            && self.live.base().state() == State::Closed
            && self.request.base().state() == State::Closed
        {
            self.base.set_state(State::Closed)?;
            progressed = true;
        }

        Ok(progressed)
    }

    fn post(&mut self, _msg: &Message) -> CoreResult<()> {
        check_post_allowed(&self.base)?;
        Err(wireloom_core::Error::Protocol("stream client does not accept posted data".into()))
    }

    fn close(&mut self, force: bool) -> CoreResult<()> {
        self.state = ClientState::Closed;
        let force = force || self.base.state() == State::Error;

        if !matches!(self.request.base().state(), State::Closed) {
            self.request.close(force)?;
        }
        if !matches!(self.live.base().state(), State::Closed) {
            self.live.close(force)?;
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
