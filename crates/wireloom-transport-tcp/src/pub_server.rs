//! Pub broadcast server (§4.3 "Pub broadcast server", §8 "Pub server
//! eviction"): a single [`DataRing`] of framed messages, one accept loop, and
//! a per-client `(cursor, output buffer)` pair. A slow client is failed
//! rather than allowed to slow the producer (§5 "Pub server guarantees").

use crate::frame::{Frame, StdFrame};
use socket2::{Domain, SockAddr, Socket, Type};
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use tracing::{info, warn};
use wireloom_core::channel::{Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{pub_proto, Message, MsgType};
use wireloom_core::ring::data::{DataRing, Lookup, RingCursor};

const HELLO_FRAME_LEN: usize = 16 + 2; // StdFrame header + u16 version payload

struct ClientConn {
    socket: Socket,
    fd: i32,
    established: bool,
    input: Vec<u8>,
    input_filled: usize,
    output: VecDeque<u8>,
    cursor: RingCursor,
}

pub struct PubServer {
    base: ChannelBase,
    bind_addr: String,
    listener: Option<Socket>,
    ring: DataRing,
    clients: HashMap<i32, ClientConn>,
}

impl std::fmt::Debug for PubServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubServer")
            .field("base", &self.base)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl PubServer {
    pub fn new(name: &str, proto: &str, host: &str, cfg: &Config) -> PubServer {
        let mut base = ChannelBase::new(name, proto, StaticCaps::OUTPUT | StaticCaps::PARENT);
        *base.config_mut() = cfg.clone();
        let size = cfg.get("size").and_then(parse_size).unwrap_or(64 * 1024);
        PubServer {
            base,
            bind_addr: host.to_string(),
            listener: None,
            ring: DataRing::new(size),
            clients: HashMap::new(),
        }
    }

    fn accept_loop(&mut self) {
        let Some(listener) = self.listener.as_ref() else { return };
        loop {
            match listener.accept() {
                Ok((socket, _addr)) => {
                    let _ = socket.set_nonblocking(true);
                    let fd = socket.as_raw_fd();
                    self.clients.insert(
                        fd,
                        ClientConn {
                            socket,
                            fd,
                            established: false,
                            input: vec![0u8; HELLO_FRAME_LEN],
                            input_filled: 0,
                            output: VecDeque::new(),
                            cursor: RingCursor::default(),
                        },
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(server = %self.base.name(), error = %e, "pub accept() failed");
                    break;
                }
            }
        }
    }

    /// Sends as many ready frames as the client's socket will currently
    /// accept. A partial write leaves the remainder in `client.output` and
    /// stops — the next `process()` tick resumes it (§9 "no send across wrap
    /// in one call"). Free function (rather than a method) so it only
    /// borrows the one `ClientConn` plus `ring`, never the whole server.
    fn service_one(ring: &DataRing, client: &mut ClientConn) -> std::io::Result<()> {
        if !client.established {
            if client.input_filled < HELLO_FRAME_LEN {
                let n = client.socket.read(&mut client.input[client.input_filled..])?;
                if n == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed during hello"));
                }
                client.input_filled += n;
            }
            if client.input_filled < HELLO_FRAME_LEN {
                return Ok(());
            }
            let hdr = StdFrame.decode(&client.input).expect("fixed-size hello buffer");
            let version = u16::from_le_bytes(client.input[16..18].try_into().unwrap());
            if hdr.msgid != pub_proto::CLIENT_HELLO || version != pub_proto::VERSION {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("bad hello: msgid={}, version={version}", hdr.msgid),
                ));
            }
            let mut reply = Vec::with_capacity(HELLO_FRAME_LEN);
            StdFrame.encode(pub_proto::SERVER_HELLO, 0, 2, &mut reply);
            reply.extend_from_slice(&pub_proto::VERSION.to_le_bytes());
            client.socket.write_all(&reply)?;
            client.established = true;
            client.cursor = RingCursor {
                next_seq: ring.newest_seq().map(|s| s + 1).unwrap_or(0),
            };
            return Ok(());
        }

        loop {
            if !client.output.is_empty() {
                let (front, _) = client.output.as_slices();
                match client.socket.write(front)? {
                    0 => break,
                    n => {
                        client.output.drain(..n);
                        if !client.output.is_empty() {
                            break;
                        }
                    }
                }
            }

            match ring.lookup(client.cursor) {
                Lookup::Empty => break,
                Lookup::OutOfData => {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "out of data"));
                }
                Lookup::Frame(frame) => {
                    let mut out = Vec::with_capacity(StdFrame.header_len() + frame.payload.len());
                    StdFrame.encode(frame.msgid, frame.seq, frame.payload.len(), &mut out);
                    out.extend_from_slice(&frame.payload);
                    let seq = frame.seq;
                    let n = client.socket.write(&out)?;
                    client.cursor.next_seq = seq + 1;
                    if n < out.len() {
                        client.output.extend(out[n..].iter().copied());
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn service_client(&mut self, fd: i32) {
        let Some(client) = self.clients.get_mut(&fd) else { return };
        match PubServer::service_one(&self.ring, client) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                info!(server = %self.base.name(), fd, error = %e, "pub client failed, removing it");
                self.clients.remove(&fd);
            }
        }
    }
}

fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("kb") {
        n.parse::<usize>().ok().map(|v| v * 1024)
    } else if let Some(n) = s.strip_suffix("mb") {
        n.parse::<usize>().ok().map(|v| v * 1024 * 1024)
    } else {
        s.parse().ok()
    }
}

impl Channel for PubServer {
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
            .map_err(|e| wireloom_core::Error::Protocol(format!("bad pub bind address `{}`: {e}", self.bind_addr)))?;
        let socket = Socket::new(Domain::for_address(sockaddr), Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(sockaddr))?;
        socket.listen(128)?;
        socket.set_nonblocking(true)?;
        let fd = socket.as_raw_fd();
        self.base.set_fd(Some(fd));
        self.listener = Some(socket);
        self.base.add_dcaps(Dcaps::POLLIN | Dcaps::PROCESS | Dcaps::PENDING);
        self.base.set_state(State::Active)?;
        Ok(())
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        self.accept_loop();
        let fds: Vec<i32> = self.clients.keys().copied().collect();
        for fd in fds {
            self.service_client(fd);
        }
        Ok(!self.clients.is_empty())
    }

    fn post(&mut self, msg: &Message) -> wireloom_core::Result<()> {
        if msg.ty != MsgType::Data {
            return Ok(());
        }
        self.ring.push(msg.seq, msg.msgid, msg.data.clone());
        let fds: Vec<i32> = self.clients.keys().copied().collect();
        for fd in fds {
            self.service_client(fd);
        }
        Ok(())
    }

    fn close(&mut self, _force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        self.clients.clear();
        self.listener = None;
        self.base.set_fd(None);
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}
