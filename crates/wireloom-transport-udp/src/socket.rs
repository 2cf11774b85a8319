//! The UDP channel (§4.3's "F" row: "Framed byte streams; mcast UDP").
//! Unlike TCP there is no connection handshake and no framing byte-stream to
//! drain: every `recvfrom()` is already one message, so `process()` just
//! drains as many ready datagrams as the socket currently has buffered.

use crate::dgram;
use crate::error::{Error, Result};
use socket2::{Domain, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use tracing::warn;
use wireloom_core::channel::{check_post_allowed, Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{Message, MsgType, Peer};

/// Multicast join parameters parsed from the `mcast.*` URL keys (grounded in
/// the original channel's `_multi`/`_mcast_loop`/`_mcast_interface`/`_ttl`
/// fields, reduced to the IPv4 case).
#[derive(Debug, Clone, Default)]
pub struct McastOptions {
    pub group: Option<Ipv4Addr>,
    pub interface: Ipv4Addr,
    pub loopback: bool,
    pub ttl: Option<u32>,
}

impl McastOptions {
    pub fn from_config(cfg: &Config) -> McastOptions {
        McastOptions {
            group: cfg.get("mcast.group").and_then(|s| s.parse().ok()),
            interface: cfg
                .get("mcast.interface")
                .and_then(|s| s.parse().ok())
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
            loopback: cfg.get_bool("mcast.loop", true),
            ttl: cfg.get("mcast.ttl").and_then(|s| s.parse().ok()),
        }
    }

    fn apply(&self, socket: &Socket) -> std::io::Result<()> {
        if let Some(group) = self.group {
            socket.join_multicast_v4(&group, &self.interface)?;
            socket.set_multicast_loop_v4(self.loopback)?;
            if let Some(ttl) = self.ttl {
                socket.set_multicast_ttl_v4(ttl)?;
            }
        }
        Ok(())
    }
}

pub struct UdpChannel {
    base: ChannelBase,
    bind_addr: String,
    peer_addr: Option<SocketAddr>,
    socket: Option<Socket>,
    mcast: McastOptions,
    next_seq: i64,
    recv_buf: Vec<std::mem::MaybeUninit<u8>>,
}

impl std::fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpChannel").field("base", &self.base).finish()
    }
}

impl UdpChannel {
    pub fn new(name: &str, proto: &str, host: &str, cfg: &Config) -> UdpChannel {
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT | StaticCaps::OUTPUT);
        *base.config_mut() = cfg.clone();
        UdpChannel {
            base,
            bind_addr: host.to_string(),
            peer_addr: cfg.get("udp.peer").and_then(|s| s.parse().ok()),
            socket: None,
            mcast: McastOptions::from_config(cfg),
            next_seq: 0,
            recv_buf: vec![std::mem::MaybeUninit::uninit(); 64 * 1024],
        }
    }
}

impl Channel for UdpChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> wireloom_core::Result<()> {
        self.base.set_state(State::Opening)?;
        let sockaddr: SocketAddr = if self.bind_addr.is_empty() {
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
        } else {
            self.bind_addr
                .parse()
                .map_err(|e| wireloom_core::Error::from(Error::Config(format!("bad udp address `{}`: {e}", self.bind_addr))))?
        };
        let socket = Socket::new(Domain::for_address(sockaddr), Type::DGRAM, Some(socket2::Protocol::UDP))
            .map_err(Error::Io)?;
        socket.set_reuse_address(true).map_err(Error::Io)?;
        socket.bind(&SockAddr::from(sockaddr)).map_err(Error::Io)?;
        self.mcast.apply(&socket).map_err(Error::Io)?;
        if let Some(peer) = self.peer_addr {
            socket.connect(&SockAddr::from(peer)).map_err(Error::Io)?;
        }
        socket.set_nonblocking(true).map_err(Error::Io)?;
        let fd = socket.as_raw_fd();
        self.base.set_fd(Some(fd));
        self.socket = Some(socket);
        self.base.add_dcaps(Dcaps::POLLIN | Dcaps::PROCESS);
        self.base.set_state(State::Active)?;
        Ok(())
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        let Some(socket) = self.socket.as_mut() else { return Ok(false) };
        let mut progressed = false;
        loop {
            match socket.recv_from(&mut self.recv_buf) {
                Ok((n, from)) => {
                    progressed = true;
                    let peer = from.as_socket().map(|_| Peer::Udp { fd: socket.as_raw_fd() }).unwrap_or(Peer::None);
                    // Sound: `recv_from` just initialised these `n` bytes.
                    let received = unsafe {
                        std::slice::from_raw_parts(self.recv_buf.as_ptr() as *const u8, n)
                    };
                    match dgram::decode(received) {
                        Some((hdr, payload)) => {
                            let payload = payload.to_vec();
                            self.base.emit_data(hdr.msgid, hdr.seq, peer, payload);
                        }
                        None => warn!(channel = %self.base.name(), len = n, "dropping undersized udp datagram"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::Io(e).into()),
            }
        }
        Ok(progressed)
    }

    fn post(&mut self, msg: &Message) -> wireloom_core::Result<()> {
        check_post_allowed(&self.base)?;
        if msg.ty != MsgType::Data {
            return Ok(());
        }
        let Some(socket) = self.socket.as_ref() else {
            return Err(wireloom_core::Error::NoFd(self.base.name().to_string()));
        };
        let seq = if msg.seq != 0 { msg.seq } else { self.next_seq };
        self.next_seq = seq + 1;
        let mut out = Vec::new();
        dgram::encode(msg.msgid, seq, &msg.data, &mut out);

        let sent = match msg.addr {
            Peer::None => socket.send(&out),
            _ => match self.peer_addr {
                Some(peer) => socket.send_to(&out, &SockAddr::from(peer)),
                None => socket.send(&out),
            },
        };
        sent.map(|_| ()).map_err(|e| Error::Io(e).into())
    }

    fn close(&mut self, _force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        self.socket = None;
        self.base.set_fd(None);
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}
