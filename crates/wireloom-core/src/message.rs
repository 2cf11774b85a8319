use std::time::{SystemTime, UNIX_EPOCH};

/// The four message kinds every channel multiplexes over a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MsgType {
    Data = 0,
    Control = 1,
    State = 2,
    Channel = 3,
}

/// Bitmask over [`MsgType`], used by callback registration and dump filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgMask(u8);

impl MsgMask {
    pub const NONE: MsgMask = MsgMask(0);
    pub const ALL: MsgMask = MsgMask(0b1111);

    pub fn of(ty: MsgType) -> Self {
        MsgMask(1 << (ty as u8))
    }

    pub fn contains(self, ty: MsgType) -> bool {
        self.0 & (1 << (ty as u8)) != 0
    }

    pub fn union(self, other: MsgMask) -> MsgMask {
        MsgMask(self.0 | other.0)
    }
}

impl std::ops::BitOr for MsgMask {
    type Output = MsgMask;
    fn bitor(self, rhs: MsgMask) -> MsgMask {
        self.union(rhs)
    }
}

/// An 8-byte opaque peer address. Transports cast it to their own addressing
/// scheme; kept as a typed sum internally (Design Notes: "integer addresses
/// that alias a struct") and only flattened to 8 bytes at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Peer {
    #[default]
    None,
    Tcp {
        fd: i32,
        accept_seq: u32,
    },
    Udp {
        fd: i32,
    },
    Worker {
        id: u32,
    },
    Opaque(u64),
}

impl Peer {
    pub fn to_bytes(self) -> [u8; 8] {
        match self {
            Peer::None => [0u8; 8],
            Peer::Tcp { fd, accept_seq } => {
                let mut b = [0u8; 8];
                b[0..4].copy_from_slice(&fd.to_le_bytes());
                b[4..8].copy_from_slice(&accept_seq.to_le_bytes());
                b
            }
            Peer::Udp { fd } => {
                let mut b = [0u8; 8];
                b[0..4].copy_from_slice(&fd.to_le_bytes());
                b
            }
            Peer::Worker { id } => {
                let mut b = [0u8; 8];
                b[0..4].copy_from_slice(&id.to_le_bytes());
                b
            }
            Peer::Opaque(v) => v.to_le_bytes(),
        }
    }
}

/// Fixed header plus payload bytes, as described in the Data Model.
#[derive(Debug, Clone)]
pub struct Message {
    pub ty: MsgType,
    pub msgid: i32,
    pub seq: i64,
    pub flags: u32,
    pub addr: Peer,
    pub time_ns: u64,
    pub data: Vec<u8>,
}

impl Message {
    pub fn data(msgid: i32, seq: i64, data: Vec<u8>) -> Self {
        Message {
            ty: MsgType::Data,
            msgid,
            seq,
            flags: 0,
            addr: Peer::None,
            time_ns: now_ns(),
            data,
        }
    }

    pub fn control(msgid: i32, data: Vec<u8>) -> Self {
        Message {
            ty: MsgType::Control,
            msgid,
            seq: 0,
            flags: 0,
            addr: Peer::None,
            time_ns: now_ns(),
            data,
        }
    }

    pub fn state(new_state: i32) -> Self {
        Message {
            ty: MsgType::State,
            msgid: new_state,
            seq: 0,
            flags: 0,
            addr: Peer::None,
            time_ns: now_ns(),
            data: Vec::new(),
        }
    }

    pub fn channel_meta(msgid: i32, data: Vec<u8>) -> Self {
        Message {
            ty: MsgType::Channel,
            msgid,
            seq: 0,
            flags: 0,
            addr: Peer::None,
            time_ns: now_ns(),
            data,
        }
    }

    pub fn with_addr(mut self, addr: Peer) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = seq;
        self
    }
}

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Channel-meta msgids (component D, §4.2): these drive loop bookkeeping
/// rather than user callbacks.
pub mod channel_meta {
    pub const UPDATE: i32 = 1;
    pub const UPDATE_FD: i32 = 2;
    pub const ADD: i32 = 3;
    pub const DELETE: i32 = 4;
}

/// Well-known control msgids emitted by TCP transports (§6).
pub mod tcp_control {
    pub const CONNECT: i32 = 10;
    pub const DISCONNECT: i32 = 20;
    pub const WRITE_FULL: i32 = 30;
    pub const WRITE_READY: i32 = 31;
}

/// Stream protocol msgids (§4.4 / §6), 10-40 inclusive.
pub mod stream_proto {
    pub const REQUEST_LEGACY: i32 = 11;
    pub const REQUEST: i32 = 12;
    pub const REPLY: i32 = 20;
    pub const ERROR: i32 = 30;
    pub const CLIENT_DONE: i32 = 40;
}

/// Pub wire-protocol handshake msgids (§6).
pub mod pub_proto {
    pub const CLIENT_HELLO: i32 = 1;
    pub const SERVER_HELLO: i32 = 2;
    pub const VERSION: u16 = 1;
}
