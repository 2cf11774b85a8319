//! The TCP frame template (§4.3 "Framing", §9 "Void/typed frame template").
//!
//! The source's per-frame-type code explosion (`Client`/`Server`/`Socket` ×
//! `{none, std, short, tiny}`) is a compile-time-dispatch optimisation; here
//! it is a `Frame` trait with one concrete implementor per variant, selected
//! once at construction from the `frame` URL key. Every variant keeps a
//! `size` field — without one a byte stream has no frame boundary at all —
//! and varies which of `msgid`/`seq` it carries and at what width. `seq-only`
//! is read as "no `msgid` field" and `size-only` as "neither `msgid` nor
//! `seq`", the narrowest reading consistent with both names.

pub struct FrameHeader {
    pub msgid: i32,
    pub seq: i64,
    pub payload_len: usize,
}

/// A concrete header codec. `header_len` must be constant for the lifetime of
/// the channel; `decode` returns `None` on a short read (caller waits for
/// more bytes), `Err` on a payload length the variant cannot represent.
pub trait Frame: Send + std::fmt::Debug {
    fn header_len(&self) -> usize;
    fn max_payload(&self) -> usize;
    fn encode(&self, msgid: i32, seq: i64, payload_len: usize, out: &mut Vec<u8>);
    fn decode(&self, buf: &[u8]) -> Option<FrameHeader>;
}

/// `{u32 size, i32 msgid, i64 seq}`, 16 bytes — the default (§6 pub wire
/// protocol uses exactly this layout).
#[derive(Debug, Default)]
pub struct StdFrame;

impl Frame for StdFrame {
    fn header_len(&self) -> usize {
        16
    }
    fn max_payload(&self) -> usize {
        u32::MAX as usize
    }
    fn encode(&self, msgid: i32, seq: i64, payload_len: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload_len as u32).to_le_bytes());
        out.extend_from_slice(&msgid.to_le_bytes());
        out.extend_from_slice(&seq.to_le_bytes());
    }
    fn decode(&self, buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < self.header_len() {
            return None;
        }
        let size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let msgid = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let seq = i64::from_le_bytes(buf[8..16].try_into().unwrap());
        Some(FrameHeader {
            msgid,
            seq,
            payload_len: size as usize,
        })
    }
}

/// `{u16 size, i16 msgid, i32 seq}`, 8 bytes.
#[derive(Debug, Default)]
pub struct ShortFrame;

impl Frame for ShortFrame {
    fn header_len(&self) -> usize {
        8
    }
    fn max_payload(&self) -> usize {
        u16::MAX as usize
    }
    fn encode(&self, msgid: i32, seq: i64, payload_len: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload_len as u16).to_le_bytes());
        out.extend_from_slice(&(msgid as i16).to_le_bytes());
        out.extend_from_slice(&(seq as i32).to_le_bytes());
    }
    fn decode(&self, buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < self.header_len() {
            return None;
        }
        let size = u16::from_le_bytes(buf[0..2].try_into().unwrap());
        let msgid = i16::from_le_bytes(buf[2..4].try_into().unwrap());
        let seq = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        Some(FrameHeader {
            msgid: msgid as i32,
            seq: seq as i64,
            payload_len: size as usize,
        })
    }
}

/// `{u8 size, u8 msgid}`, 2 bytes. No `seq` field; always reported as 0.
#[derive(Debug, Default)]
pub struct TinyFrame;

impl Frame for TinyFrame {
    fn header_len(&self) -> usize {
        2
    }
    fn max_payload(&self) -> usize {
        u8::MAX as usize
    }
    fn encode(&self, msgid: i32, _seq: i64, payload_len: usize, out: &mut Vec<u8>) {
        out.push(payload_len as u8);
        out.push(msgid as u8);
    }
    fn decode(&self, buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < self.header_len() {
            return None;
        }
        Some(FrameHeader {
            msgid: buf[1] as i32,
            seq: 0,
            payload_len: buf[0] as usize,
        })
    }
}

/// `{u32 size}`, 4 bytes. No `msgid`/`seq`; both reported as 0.
#[derive(Debug, Default)]
pub struct SizeOnlyFrame;

impl Frame for SizeOnlyFrame {
    fn header_len(&self) -> usize {
        4
    }
    fn max_payload(&self) -> usize {
        u32::MAX as usize
    }
    fn encode(&self, _msgid: i32, _seq: i64, payload_len: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload_len as u32).to_le_bytes());
    }
    fn decode(&self, buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < self.header_len() {
            return None;
        }
        let size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        Some(FrameHeader {
            msgid: 0,
            seq: 0,
            payload_len: size as usize,
        })
    }
}

/// `{u32 size, i64 seq}`, 12 bytes. No `msgid`; reported as 0.
#[derive(Debug, Default)]
pub struct SeqOnlyFrame;

impl Frame for SeqOnlyFrame {
    fn header_len(&self) -> usize {
        12
    }
    fn max_payload(&self) -> usize {
        u32::MAX as usize
    }
    fn encode(&self, _msgid: i32, seq: i64, payload_len: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload_len as u32).to_le_bytes());
        out.extend_from_slice(&seq.to_le_bytes());
    }
    fn decode(&self, buf: &[u8]) -> Option<FrameHeader> {
        if buf.len() < self.header_len() {
            return None;
        }
        let size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let seq = i64::from_le_bytes(buf[4..12].try_into().unwrap());
        Some(FrameHeader {
            msgid: 0,
            seq,
            payload_len: size as usize,
        })
    }
}

/// Selects a frame variant from the `frame` URL key, defaulting to `std`.
pub fn frame_for_name(name: &str) -> Box<dyn Frame> {
    match name {
        "short" => Box::new(ShortFrame),
        "tiny" => Box::new(TinyFrame),
        "size-only" => Box::new(SizeOnlyFrame),
        "seq-only" => Box::new(SeqOnlyFrame),
        _ => Box::new(StdFrame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_frame_roundtrips() {
        let f = StdFrame;
        let mut buf = Vec::new();
        f.encode(7, 42, 3, &mut buf);
        buf.extend_from_slice(b"abc");
        let hdr = f.decode(&buf).unwrap();
        assert_eq!(hdr.msgid, 7);
        assert_eq!(hdr.seq, 42);
        assert_eq!(hdr.payload_len, 3);
    }

    #[test]
    fn tiny_frame_drops_seq() {
        let f = TinyFrame;
        let mut buf = Vec::new();
        f.encode(5, 999, 10, &mut buf);
        let hdr = f.decode(&buf).unwrap();
        assert_eq!(hdr.seq, 0);
        assert_eq!(hdr.msgid, 5);
        assert_eq!(hdr.payload_len, 10);
    }

    #[test]
    fn short_read_returns_none() {
        let f = StdFrame;
        assert!(f.decode(&[0u8; 4]).is_none());
    }
}
