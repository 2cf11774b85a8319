//! Datagram header codec. UDP already delimits messages (one `recvfrom()`
//! call returns exactly one datagram), so unlike the TCP `Frame` trait there
//! is no `size` field to parse a byte stream into frames — only the
//! `{msgid, seq}` pair needed to multiplex datagrams the same way every
//! other transport does (§4.3 framing, reduced to what a message-boundary
//! transport actually needs).

pub const HEADER_LEN: usize = 12; // i32 msgid, i64 seq

pub struct DgramHeader {
    pub msgid: i32,
    pub seq: i64,
}

pub fn encode(msgid: i32, seq: i64, payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(HEADER_LEN + payload.len());
    out.extend_from_slice(&msgid.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(payload);
}

/// Splits a received datagram into its header and payload. `None` if the
/// datagram is shorter than the fixed header (malformed sender).
pub fn decode(buf: &[u8]) -> Option<(DgramHeader, &[u8])> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let msgid = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    let seq = i64::from_le_bytes(buf[4..12].try_into().unwrap());
    Some((DgramHeader { msgid, seq }, &buf[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let mut buf = Vec::new();
        encode(7, 42, b"hello", &mut buf);
        let (hdr, payload) = decode(&buf).unwrap();
        assert_eq!(hdr.msgid, 7);
        assert_eq!(hdr.seq, 42);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert!(decode(&[0u8; 4]).is_none());
    }
}
