//! Pub broadcast client (§4.3 "Pub broadcast client", §6 "Pub wire
//! protocol"): dials the server, exchanges the `{version}` hello, then
//! forwards every subsequent frame as a Data message.

use crate::frame::{Frame, StdFrame};
use socket2::{Domain, SockAddr, Socket, Type};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use wireloom_core::channel::{ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{pub_proto, Message, Peer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    SendingHello,
    AwaitingHello,
    Streaming,
}

pub struct PubClient {
    base: ChannelBase,
    target: String,
    socket: Option<Socket>,
    phase: Phase,
    input: Vec<u8>,
    input_filled: usize,
    output: Vec<u8>,
    output_sent: usize,
    frame: StdFrame,
}

impl std::fmt::Debug for PubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubClient").field("base", &self.base).field("phase", &self.phase).finish()
    }
}

impl PubClient {
    pub fn new(name: &str, proto: &str, host: &str, cfg: &Config) -> PubClient {
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT);
        *base.config_mut() = cfg.clone();
        PubClient {
            base,
            target: host.to_string(),
            socket: None,
            phase: Phase::Connecting,
            input: vec![0u8; 64 * 1024],
            input_filled: 0,
            output: Vec::new(),
            output_sent: 0,
            frame: StdFrame,
        }
    }

    fn drain_data_frames(&mut self) {
        let mut consumed = 0usize;
        loop {
            let remaining = &self.input[consumed..self.input_filled];
            let Some(hdr) = self.frame.decode(remaining) else { break };
            let total = self.frame.header_len() + hdr.payload_len;
            if remaining.len() < total {
                break;
            }
            let payload = remaining[self.frame.header_len()..total].to_vec();
            self.base.emit_data(hdr.msgid, hdr.seq, Peer::None, payload);
            consumed += total;
        }
        if consumed > 0 {
            self.input.copy_within(consumed..self.input_filled, 0);
            self.input_filled -= consumed;
        }
    }
}

impl wireloom_core::channel::Channel for PubClient {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> wireloom_core::Result<()> {
        self.base.set_state(State::Opening)?;
        let sockaddr: SocketAddr = self
            .target
            .parse()
            .map_err(|e| wireloom_core::Error::Protocol(format!("bad pub server address `{}`: {e}", self.target)))?;
        let socket = Socket::new(Domain::for_address(sockaddr), Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&SockAddr::from(sockaddr)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) if e.raw_os_error() == Some(115) => {}
            Err(e) => return Err(e.into()),
        }
        let fd = socket.as_raw_fd();
        self.socket = Some(socket);
        self.base.set_fd(Some(fd));
        self.base.add_dcaps(Dcaps::POLLOUT | Dcaps::PROCESS);
        self.phase = Phase::Connecting;
        Ok(())
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        let Some(socket) = self.socket.as_mut() else { return Ok(false) };

        if self.phase == Phase::Connecting {
            match socket.take_error()? {
                Some(e) => {
                    self.base.set_state(State::Error)?;
                    return Err(e.into());
                }
                None => {
                    let mut hello = Vec::with_capacity(18);
                    self.frame.encode(pub_proto::CLIENT_HELLO, 0, 2, &mut hello);
                    hello.extend_from_slice(&pub_proto::VERSION.to_le_bytes());
                    self.output = hello;
                    self.output_sent = 0;
                    self.phase = Phase::SendingHello;
                }
            }
        }

        if self.phase == Phase::SendingHello {
            match socket.write(&self.output[self.output_sent..]) {
                Ok(0) => {}
                Ok(n) => self.output_sent += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => {
                    self.base.set_state(State::Error)?;
                    return Err(e.into());
                }
            }
            if self.output_sent == self.output.len() {
                self.base.remove_dcaps(Dcaps::POLLOUT);
                self.base.add_dcaps(Dcaps::POLLIN);
                self.phase = Phase::AwaitingHello;
            }
            return Ok(true);
        }

        // AwaitingHello and Streaming both read; only their frame
        // interpretation differs.
        match socket.read(&mut self.input[self.input_filled..]) {
            Ok(0) => {
                self.base.set_state(State::Closing)?;
                return Ok(false);
            }
            Ok(n) => self.input_filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => {
                self.base.set_state(State::Error)?;
                return Err(e.into());
            }
        }

        if self.phase == Phase::AwaitingHello {
            let Some(hdr) = self.frame.decode(&self.input[..self.input_filled]) else { return Ok(true) };
            let total = self.frame.header_len() + hdr.payload_len;
            if self.input_filled < total {
                return Ok(true);
            }
            let version = u16::from_le_bytes(self.input[16..18].try_into().unwrap());
            if hdr.msgid != pub_proto::SERVER_HELLO || version != pub_proto::VERSION {
                self.base.set_state(State::Error)?;
                return Err(wireloom_core::Error::Protocol(format!(
                    "bad server hello: msgid={}, version={version}",
                    hdr.msgid
                )));
            }
            self.input.copy_within(total..self.input_filled, 0);
            self.input_filled -= total;
            self.phase = Phase::Streaming;
            self.base.set_state(State::Active)?;
            return Ok(true);
        }

        self.drain_data_frames();
        Ok(true)
    }

    fn post(&mut self, _msg: &Message) -> wireloom_core::Result<()> {
        Err(wireloom_core::Error::Protocol("pub client is read-only".into()))
    }

    fn close(&mut self, _force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        if let Some(socket) = self.socket.as_ref() {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        self.socket = None;
        self.base.set_fd(None);
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}
