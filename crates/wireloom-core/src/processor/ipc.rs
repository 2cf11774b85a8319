//! Control IPC messages exchanged between the processor and its workers
//! (§4.5). Carried over a plain `std::sync::mpsc` pair per worker for the
//! downstream direction, and a single shared `mpsc` sender cloned into every
//! worker for the upstream direction — mpsc is a multi-producer/single
//! consumer channel, which is exactly the "processor <-> many workers"
//! shape here, so no broadcast primitive is needed.

use crate::channel::State;

#[derive(Debug, Clone)]
pub enum Downstream {
    Activate { object: String },
    Deactivate { object: String },
    Exit,
}

#[derive(Debug, Clone)]
pub enum Upstream {
    WorkerState { worker: String, state: State },
    ObjectState { object: String, worker: String, state: State },
    WorkerExit { worker: String, code: i32 },
}

/// User-visible control requests a CLI or management surface can inject
/// (§4.5's "user-visible" IPC messages). Not wired to a network transport
/// here — the stream server or a future admin channel would post these.
#[derive(Debug, Clone)]
pub enum UserControl {
    StateDump,
    MessageForward { object: String, msgid: i32, payload: Vec<u8> },
    ChannelClose { object: String },
}
