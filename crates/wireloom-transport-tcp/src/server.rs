//! The TCP accept server (§4.3 "Server"). Binds one address, accepts
//! incoming connections into a client map keyed by `(fd, accept-seq)`
//! exactly as `Peer::Tcp` represents a TCP peer address, and drives every
//! accepted socket's I/O from its own `process()` call. Accepted sockets are
//! not separately registered with the shared [`wireloom_core::evloop::EventLoop`] —
//! the server channel keeps `PENDING` set permanently so the loop calls its
//! `process()` every step regardless of the listener fd's readiness, and the
//! server does its own non-blocking read/write attempt per child socket
//! inside that one call. This is a deliberate simplification from a loop
//! that could directly multiplex N child fds; see `DESIGN.md`.

use crate::error::Error;
use crate::socket::{TcpChannel, TcpOptions};
use socket2::{Domain, SockAddr, Socket, Type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use tracing::warn;
use wireloom_core::channel::{Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{tcp_control, Message, MsgType, Peer};

pub struct TcpServer {
    base: ChannelBase,
    proto: String,
    bind_addr: String,
    listener: Option<Socket>,
    clients: HashMap<(i32, u32), TcpChannel>,
    next_accept_seq: u32,
    options: TcpOptions,
    frame_name: String,
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("base", &self.base)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl TcpServer {
    pub fn new(name: &str, proto: &str, host: &str, cfg: &Config) -> TcpServer {
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT | StaticCaps::PARENT);
        *base.config_mut() = cfg.clone();
        TcpServer {
            base,
            proto: proto.to_string(),
            bind_addr: host.to_string(),
            listener: None,
            clients: HashMap::new(),
            next_accept_seq: 0,
            options: TcpOptions::from_config(cfg),
            frame_name: cfg.get("frame").unwrap_or("std").to_string(),
        }
    }

    fn accept_loop(&mut self) {
        let Some(listener) = self.listener.as_ref() else { return };
        loop {
            match listener.accept() {
                Ok((socket, addr)) => {
                    let fd = socket.as_raw_fd();
                    let accept_seq = self.next_accept_seq;
                    self.next_accept_seq += 1;
                    let peer = Peer::Tcp { fd, accept_seq };
                    let child_name = format!("{}.{}", self.base.name(), accept_seq);
                    match TcpChannel::from_accepted(&child_name, &self.proto, socket, peer, self.options, &self.frame_name) {
                        Ok(channel) => {
                            self.base.emit_control(
                                tcp_control::CONNECT,
                                peer,
                                format_peer_addr(&addr),
                            );
                            self.clients.insert((fd, accept_seq), channel);
                        }
                        Err(e) => warn!(server = %self.base.name(), error = %e, "failed to wrap accepted socket"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(server = %self.base.name(), error = %e, "accept() failed");
                    break;
                }
            }
        }
    }
}

fn format_peer_addr(addr: &SockAddr) -> Vec<u8> {
    addr.as_socket().map(|s| s.to_string().into_bytes()).unwrap_or_default()
}

impl Channel for TcpServer {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> wireloom_core::Result<()> {
        self.base.set_state(State::Opening)?;
        let sockaddr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| wireloom_core::Error::from(Error::Config(format!("bad bind address `{}`: {e}", self.bind_addr))))?;
        let socket =
            Socket::new(Domain::for_address(sockaddr), Type::STREAM, Some(socket2::Protocol::TCP)).map_err(Error::Io)?;
        socket.set_reuse_address(true).map_err(Error::Io)?;
        socket.bind(&SockAddr::from(sockaddr)).map_err(Error::Io)?;
        socket.listen(128).map_err(Error::Io)?;
        socket.set_nonblocking(true).map_err(Error::Io)?;
        let fd = socket.as_raw_fd();
        self.base.set_fd(Some(fd));
        self.listener = Some(socket);
        self.base.add_dcaps(Dcaps::POLLIN | Dcaps::PROCESS | Dcaps::PENDING);
        self.base.set_state(State::Active)?;
        Ok(())
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        self.accept_loop();

        let mut progressed = false;
        let mut dead = Vec::new();
        for (key, client) in self.clients.iter_mut() {
            match client.process() {
                Ok(p) => progressed |= p,
                Err(e) => {
                    warn!(server = %self.base.name(), client = ?key, error = %e, "client process() failed");
                    let _ = client.close(true);
                }
            }
            if matches!(client.base().state(), State::Closed | State::Error | State::Destroy) {
                dead.push(*key);
            }
        }
        for key in dead {
            self.clients.remove(&key);
        }
        Ok(progressed)
    }

    fn post(&mut self, msg: &Message) -> wireloom_core::Result<()> {
        if msg.ty != MsgType::Data {
            return Ok(());
        }
        let Peer::Tcp { fd, accept_seq } = msg.addr else {
            return Err(wireloom_core::Error::Protocol("post() to tcp server requires a Peer::Tcp address".into()));
        };
        let client = self
            .clients
            .get_mut(&(fd, accept_seq))
            .ok_or_else(|| wireloom_core::Error::Protocol(format!("no such client (fd={fd}, seq={accept_seq})")))?;
        client.post(msg)
    }

    fn close(&mut self, force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        for (_, mut client) in self.clients.drain() {
            let _ = client.close(force);
        }
        self.listener = None;
        self.base.set_fd(None);
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}
