//! Control msgids emitted on the stream client's own channel, mirroring the
//! source's `stream-control.h` scheme (`Online` is msgid 10 there; `EndOfBlock`
//! is used by the client but not present in the excerpted scheme, so it is
//! assigned the next id here).

pub const ONLINE: i32 = 10;
pub const END_OF_BLOCK: i32 = 11;

/// Channel-message sent by a producer to `post()` on the server to mark a
/// block boundary at the current seq (payload: block name as utf-8 bytes).
/// Not present in the excerpted source scheme; added here since
/// `StreamServer::register_block` needs a way to be driven externally.
pub const BLOCK_MARKER: i32 = 12;
