//! The Request/Reply/Error/ClientDone messages exchanged over the request
//! channel (§4.4 "Wire messages"). The source binds these to fixed offsets
//! inside a scheme buffer with separate offset-pointer storage for variable
//! length fields; here they are flat length-prefixed encodings of the same
//! fields, carried as an ordinary channel's Data payload. All integers are
//! little-endian.

use crate::error::{Error, Result};

pub const VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestData {
    Seq(u64),
    Block { name: String, index: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u16,
    pub client: String,
    pub data: RequestData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub last_seq: i64,
    pub requested_seq: i64,
    pub block_seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub text: String,
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn take(buf: &[u8], pos: &mut usize, n: usize) -> Result<[u8; 8]> {
    if *pos + n > buf.len() {
        return Err(Error::Wire("buffer underrun".into()));
    }
    let mut out = [0u8; 8];
    out[..n].copy_from_slice(&buf[*pos..*pos + n]);
    *pos += n;
    Ok(out)
}

fn take_str(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len_bytes = take(buf, pos, 4)?;
    let len = u32::from_le_bytes(len_bytes[..4].try_into().unwrap()) as usize;
    if *pos + len > buf.len() {
        return Err(Error::Wire("string length out of range".into()));
    }
    let s = String::from_utf8(buf[*pos..*pos + len].to_vec())
        .map_err(|e| Error::Wire(format!("non-utf8 string: {e}")))?;
    *pos += len;
    Ok(s)
}

pub fn encode_request(req: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&req.version.to_le_bytes());
    put_str(&mut out, &req.client);
    match &req.data {
        RequestData::Seq(seq) => {
            out.push(0);
            out.extend_from_slice(&seq.to_le_bytes());
        }
        RequestData::Block { name, index } => {
            out.push(1);
            put_str(&mut out, name);
            out.extend_from_slice(&index.to_le_bytes());
        }
    }
    out
}

pub fn decode_request(buf: &[u8]) -> Result<Request> {
    let mut pos = 0;
    let version = u16::from_le_bytes(take(buf, &mut pos, 2)?[..2].try_into().unwrap());
    let client = take_str(buf, &mut pos)?;
    let tag = *buf.get(pos).ok_or_else(|| Error::Wire("missing request tag".into()))?;
    pos += 1;
    let data = match tag {
        0 => RequestData::Seq(u64::from_le_bytes(take(buf, &mut pos, 8)?)),
        1 => {
            let name = take_str(buf, &mut pos)?;
            let index = i64::from_le_bytes(take(buf, &mut pos, 8)?);
            RequestData::Block { name, index }
        }
        other => return Err(Error::Wire(format!("unknown request tag {other}"))),
    };
    Ok(Request { version, client, data })
}

pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(&reply.last_seq.to_le_bytes());
    out.extend_from_slice(&reply.requested_seq.to_le_bytes());
    out.extend_from_slice(&reply.block_seq.to_le_bytes());
    out
}

pub fn decode_reply(buf: &[u8]) -> Result<Reply> {
    let mut pos = 0;
    let last_seq = i64::from_le_bytes(take(buf, &mut pos, 8)?);
    let requested_seq = i64::from_le_bytes(take(buf, &mut pos, 8)?);
    let block_seq = i64::from_le_bytes(take(buf, &mut pos, 8)?);
    Ok(Reply { last_seq, requested_seq, block_seq })
}

pub fn encode_error(err: &ErrorReply) -> Vec<u8> {
    let mut out = Vec::new();
    put_str(&mut out, &err.text);
    out
}

pub fn decode_error(buf: &[u8]) -> Result<ErrorReply> {
    let mut pos = 0;
    let text = take_str(buf, &mut pos)?;
    Ok(ErrorReply { text })
}

pub fn encode_client_done(seq: i64) -> Vec<u8> {
    seq.to_le_bytes().to_vec()
}

pub fn decode_client_done(buf: &[u8]) -> Result<i64> {
    let mut pos = 0;
    Ok(i64::from_le_bytes(take(buf, &mut pos, 8)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_seq_roundtrips() {
        let req = Request { version: VERSION, client: "alice".into(), data: RequestData::Seq(42) };
        let got = decode_request(&encode_request(&req)).unwrap();
        assert_eq!(got, req);
    }

    #[test]
    fn request_block_roundtrips() {
        let req = Request {
            version: VERSION,
            client: "bob".into(),
            data: RequestData::Block { name: "daily".into(), index: 7 },
        };
        let got = decode_request(&encode_request(&req)).unwrap();
        assert_eq!(got, req);
    }

    #[test]
    fn reply_roundtrips() {
        let reply = Reply { last_seq: 100, requested_seq: 50, block_seq: -1 };
        assert_eq!(decode_reply(&encode_reply(&reply)).unwrap(), reply);
    }

    #[test]
    fn error_roundtrips() {
        let err = ErrorReply { text: "nope".into() };
        assert_eq!(decode_error(&encode_error(&err)).unwrap(), err);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert!(decode_reply(&[0u8; 4]).is_err());
    }
}
