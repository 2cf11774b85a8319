//! The common TCP socket channel (§4.3 "TCP socket (common)"): an input
//! ring-buffer, an output overflow buffer, and the framing template. Used
//! both for a standalone client channel and for each socket accepted by
//! [`crate::server::TcpServer`].

use crate::error::{Error, Result};
use crate::frame::{frame_for_name, Frame};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};
use wireloom_core::channel::{check_post_allowed, Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{tcp_control, Message, MsgType, Peer};

/// Socket setup knobs recognised from the URL config (§4.3 "Setup options").
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpOptions {
    pub nodelay: bool,
    pub keepalive: bool,
    pub sndbuf: Option<usize>,
    pub rcvbuf: Option<usize>,
}

impl TcpOptions {
    pub fn from_config(cfg: &Config) -> TcpOptions {
        TcpOptions {
            nodelay: cfg.get_bool("tcp.nodelay", true),
            keepalive: cfg.get_bool("tcp.keepalive", false),
            sndbuf: cfg.get("tcp.sndbuf").and_then(|v| v.parse().ok()),
            rcvbuf: cfg.get("tcp.rcvbuf").and_then(|v| v.parse().ok()),
        }
    }

    fn apply(&self, socket: &Socket) {
        if self.nodelay {
            let _ = socket.set_nodelay(true);
        }
        if self.keepalive {
            let _ = socket.set_keepalive(true);
        }
        if let Some(n) = self.sndbuf {
            let _ = socket.set_send_buffer_size(n);
        }
        if let Some(n) = self.rcvbuf {
            let _ = socket.set_recv_buffer_size(n);
        }
    }
}

enum Role {
    /// Dials out to `target` once `open()` is called.
    Client { target: String },
    /// Already connected (accepted by a server, or handed in directly).
    Connected,
}

/// A single framed TCP connection, either end. §4.3's "input ring-buffer"
/// and "output overflow buffer" are a plain growable `Vec`/`VecDeque` here:
/// the source's fixed-size ring is an allocation optimisation the trait
/// object boundary makes unnecessary to reproduce.
pub struct TcpChannel {
    base: ChannelBase,
    frame: Box<dyn Frame>,
    socket: Option<Socket>,
    role: Role,
    input: Vec<u8>,
    input_filled: usize,
    output: VecDeque<u8>,
    addr: Peer,
    options: TcpOptions,
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel").field("base", &self.base).finish()
    }
}

impl TcpChannel {
    pub fn new_client(name: &str, proto: &str, host: &str, cfg: &Config) -> TcpChannel {
        let frame = frame_for_name(cfg.get("frame").unwrap_or("std"));
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT | StaticCaps::OUTPUT);
        *base.config_mut() = cfg.clone();
        TcpChannel {
            base,
            frame,
            socket: None,
            role: Role::Client { target: host.to_string() },
            input: vec![0u8; 64 * 1024],
            input_filled: 0,
            output: VecDeque::new(),
            addr: Peer::None,
            options: TcpOptions::from_config(cfg),
        }
    }

    /// Wraps an already-connected socket, e.g. one returned by `accept()`.
    pub fn from_accepted(name: &str, proto: &str, socket: Socket, addr: Peer, options: TcpOptions, frame_name: &str) -> Result<TcpChannel> {
        socket.set_nonblocking(true)?;
        options.apply(&socket);
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT | StaticCaps::OUTPUT);
        let fd = socket.as_raw_fd();
        base.set_fd(Some(fd));
        base.set_state(State::Opening)?;
        base.set_state(State::Active)?;
        base.add_dcaps(Dcaps::POLLIN | Dcaps::PROCESS);
        Ok(TcpChannel {
            base,
            frame: frame_for_name(frame_name),
            socket: Some(socket),
            role: Role::Connected,
            input: vec![0u8; 64 * 1024],
            input_filled: 0,
            output: VecDeque::new(),
            addr,
            options,
        })
    }

    fn connect_nonblocking(target: &str) -> Result<Socket> {
        let sockaddr: SocketAddr = target
            .parse()
            .map_err(|e| Error::Config(format!("bad tcp address `{target}`: {e}")))?;
        let socket = Socket::new(Domain::for_address(sockaddr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&SockAddr::from(sockaddr)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            // EINPROGRESS on Linux; std doesn't always classify it as WouldBlock.
            Err(e) if e.raw_os_error() == Some(115) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(socket)
    }

    /// Parses as many whole frames as `input[..input_filled]` holds, emitting
    /// one Data message per frame and compacting the buffer afterwards.
    fn drain_frames(&mut self) {
        let mut consumed = 0usize;
        loop {
            let remaining = &self.input[consumed..self.input_filled];
            let Some(hdr) = self.frame.decode(remaining) else { break };
            let total = self.frame.header_len() + hdr.payload_len;
            if remaining.len() < total {
                break;
            }
            let payload = remaining[self.frame.header_len()..total].to_vec();
            self.base.emit_data(hdr.msgid, hdr.seq, self.addr, payload);
            consumed += total;
        }
        if consumed > 0 {
            self.input.copy_within(consumed..self.input_filled, 0);
            self.input_filled -= consumed;
        }
    }

    /// Attempts to read available bytes; returns `Ok(true)` if any frame was
    /// parsed, `Ok(false)` on EAGAIN, `Err` on a hard failure. A zero-length
    /// read is peer EOF and is reported as an `Ok(false)` plus `self.eof`.
    fn try_read(&mut self) -> Result<bool> {
        let Some(socket) = self.socket.as_mut() else { return Ok(false) };
        if self.input_filled == self.input.len() {
            self.input.resize(self.input.len() * 2, 0);
        }
        match socket.read(&mut self.input[self.input_filled..]) {
            Ok(0) => {
                self.base.emit_control(tcp_control::DISCONNECT, self.addr, Vec::new());
                self.base.set_state(State::Closing)?;
                Ok(false)
            }
            Ok(n) => {
                self.input_filled += n;
                self.drain_frames();
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Flushes buffered output, falling back to buffering the remainder
    /// again on a further partial write (§4.3 "Send").
    fn try_flush(&mut self) -> Result<()> {
        let Some(socket) = self.socket.as_mut() else { return Ok(()) };
        while !self.output.is_empty() {
            let (front, _) = self.output.as_slices();
            match socket.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    self.output.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if self.output.is_empty() {
            if self.base.dcaps().contains(Dcaps::POLLOUT) {
                self.base.remove_dcaps(Dcaps::POLLOUT);
                self.base.emit_control(tcp_control::WRITE_READY, self.addr, Vec::new());
            }
        } else {
            self.base.add_dcaps(Dcaps::POLLOUT);
        }
        Ok(())
    }

    fn finish_connect(&mut self) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else { return Ok(()) };
        match socket.take_error()? {
            Some(e) => {
                self.base.set_state(State::Error)?;
                Err(Error::Io(e))
            }
            None => {
                self.options.apply(socket);
                self.base.set_state(State::Active)?;
                self.base.remove_dcaps(Dcaps::POLLOUT);
                self.base.add_dcaps(Dcaps::POLLIN | Dcaps::PROCESS);
                Ok(())
            }
        }
    }
}

impl Channel for TcpChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> wireloom_core::Result<()> {
        match &self.role {
            Role::Connected => {
                // Already transitioned to Active in `from_accepted`.
                Ok(())
            }
            Role::Client { target } => {
                self.base.set_state(State::Opening)?;
                let socket = TcpChannel::connect_nonblocking(target).map_err(wireloom_core::Error::from)?;
                let fd = socket.as_raw_fd();
                self.socket = Some(socket);
                self.base.set_fd(Some(fd));
                self.base.add_dcaps(Dcaps::POLLOUT | Dcaps::PROCESS);
                Ok(())
            }
        }
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        if self.base.state() == State::Opening {
            return self.finish_connect().map(|_| true).map_err(Into::into);
        }
        if self.base.state() != State::Active {
            return Ok(false);
        }
        let read_progress = self.try_read().map_err(wireloom_core::Error::from)?;
        self.try_flush().map_err(wireloom_core::Error::from)?;
        Ok(read_progress)
    }

    fn post(&mut self, msg: &Message) -> wireloom_core::Result<()> {
        check_post_allowed(&self.base)?;
        if msg.ty != MsgType::Data {
            return Ok(());
        }
        if msg.data.len() > self.frame.max_payload() {
            return Err(Error::FrameTooLarge(msg.data.len()).into());
        }
        let mut out = Vec::with_capacity(self.frame.header_len() + msg.data.len());
        self.frame.encode(msg.msgid, msg.seq, msg.data.len(), &mut out);
        out.extend_from_slice(&msg.data);

        if self.output.is_empty() {
            if let Some(socket) = self.socket.as_mut() {
                match socket.write(&out) {
                    Ok(n) if n == out.len() => return Ok(()),
                    Ok(n) => {
                        self.output.extend(out[n..].iter().copied());
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        self.output.extend(out.iter().copied());
                    }
                    Err(e) => return Err(Error::from(e).into()),
                }
            }
        } else {
            self.output.extend(out.iter().copied());
        }
        self.base.add_dcaps(Dcaps::POLLOUT);
        self.base.emit_control(tcp_control::WRITE_FULL, self.addr, Vec::new());
        Ok(())
    }

    fn close(&mut self, force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        if let Some(socket) = self.socket.as_ref() {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        let _ = force; // plain TCP sockets have no sub-state machine to drain cooperatively
        self.base.emit_control(tcp_control::DISCONNECT, self.addr, Vec::new());
        self.base.set_fd(None);
        self.socket = None;
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        if self.socket.is_some() {
            debug!(channel = %self.base.name(), "dropping tcp channel with live socket");
        }
    }
}
