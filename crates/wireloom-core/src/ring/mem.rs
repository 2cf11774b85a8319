//! Memory-mapped circular data ring (§3 "Ring (memring)", §6 persisted
//! layout). Operates over a plain byte slice so the same code backs both a
//! `memmap2::MmapMut` region (the real transport) and a `Vec<u8>` (unit
//! tests) — the header/record encoding is hand-rolled little-endian byte
//! math rather than a `#[repr(C)]` cast, so there is no unsafe code here and
//! no alignment assumption on the backing slice.

use crate::error::{Error, Result};

pub const RING_MAGIC: u32 = 0x524c_4c54; // "TLLR" as a 32-bit tag
pub const HEADER_LEN: usize = 32;
const RECORD_HEADER_LEN: usize = 16; // seq: i64, msgid: i32, pad: i32

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingHeader {
    pub magic: u32,
    pub size: u32,
    pub head: u64,
    pub tail: u64,
    pub generation: u64,
}

impl RingHeader {
    fn read(buf: &[u8]) -> RingHeader {
        RingHeader {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            head: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            tail: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            generation: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        }
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.head.to_le_bytes());
        buf[16..24].copy_from_slice(&self.tail.to_le_bytes());
        buf[24..32].copy_from_slice(&self.generation.to_le_bytes());
    }
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Single-writer handle. `buf` must be `HEADER_LEN + size` bytes.
pub struct MemRingWriter<'a> {
    buf: &'a mut [u8],
    capacity: usize,
}

impl<'a> MemRingWriter<'a> {
    /// Initialises a fresh ring in `buf` (server open path, §4.3).
    pub fn init(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Protocol("memring buffer smaller than header".into()));
        }
        let capacity = buf.len() - HEADER_LEN;
        let header = RingHeader {
            magic: RING_MAGIC,
            size: capacity as u32,
            head: 0,
            tail: 0,
            generation: 0,
        };
        header.write(&mut buf[..HEADER_LEN]);
        Ok(MemRingWriter { buf, capacity })
    }

    fn header(&self) -> RingHeader {
        RingHeader::read(&self.buf[..HEADER_LEN])
    }

    fn set_header(&mut self, h: RingHeader) {
        h.write(&mut self.buf[..HEADER_LEN]);
    }

    fn used(&self, h: &RingHeader) -> u64 {
        h.head - h.tail
    }

    fn record_len_at(&self, h: &RingHeader, pos: u64) -> usize {
        let off = HEADER_LEN + (pos as usize % self.capacity);
        let payload_len = self.read_wrapped(off + 12, 4);
        let mut buf4 = [0u8; 4];
        buf4.copy_from_slice(&payload_len);
        let payload_len = u32::from_le_bytes(buf4) as usize;
        align8(RECORD_HEADER_LEN + payload_len)
    }

    fn read_wrapped(&self, byte_off_from_payload_start: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        for i in 0..len {
            let idx = HEADER_LEN + ((byte_off_from_payload_start - HEADER_LEN + i) % self.capacity);
            out[i] = self.buf[idx];
        }
        out
    }

    fn write_wrapped(&mut self, pos: u64, data: &[u8]) {
        let cap = self.capacity;
        for (i, b) in data.iter().enumerate() {
            let idx = HEADER_LEN + ((pos as usize + i) % cap);
            self.buf[idx] = *b;
        }
    }

    /// Drops the oldest record, advancing `tail` past it and bumping
    /// `generation` so outstanding readers can detect the eviction.
    fn shift(&mut self, h: &mut RingHeader) {
        if h.tail >= h.head {
            return;
        }
        let len = self.record_len_at(h, h.tail);
        h.tail += len as u64;
        h.generation += 1;
    }

    /// Frames `payload` into the ring, evicting from the front as needed
    /// (§4.3: "auto-evicting"). Fails only if a single record can never fit.
    pub fn push(&mut self, seq: i64, msgid: i32, payload: &[u8]) -> Result<()> {
        let rec_len = align8(RECORD_HEADER_LEN + payload.len());
        if rec_len > self.capacity {
            return Err(Error::RingMessageTooLarge);
        }
        let mut h = self.header();
        while self.used(&h) as usize + rec_len > self.capacity {
            self.shift(&mut h);
        }
        let mut rec = Vec::with_capacity(rec_len);
        rec.extend_from_slice(&seq.to_le_bytes());
        rec.extend_from_slice(&msgid.to_le_bytes());
        rec.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        rec.extend_from_slice(payload);
        rec.resize(rec_len, 0);
        self.write_wrapped(h.head, &rec);
        h.head += rec_len as u64;
        self.set_header(h);
        Ok(())
    }

    pub fn header_snapshot(&self) -> RingHeader {
        self.header()
    }
}

/// Read-only handle, opened by a client that mmaps the same file (§4.3).
pub struct MemRingReader<'a> {
    buf: &'a [u8],
    capacity: usize,
}

pub struct RingIterator {
    pos: u64,
}

impl<'a> MemRingReader<'a> {
    pub fn open(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Protocol("memring buffer smaller than header".into()));
        }
        let header = RingHeader::read(&buf[..HEADER_LEN]);
        if header.magic != RING_MAGIC {
            return Err(Error::Protocol(format!(
                "bad ring magic: expected {RING_MAGIC:#x}, found {:#x}",
                header.magic
            )));
        }
        let capacity = buf.len() - HEADER_LEN;
        Ok(MemRingReader { buf, capacity })
    }

    pub fn header(&self) -> RingHeader {
        RingHeader::read(&self.buf[..HEADER_LEN])
    }

    /// A fresh iterator positioned at the current head (live-feed semantics:
    /// readers join the stream going forward, per §4.3's client open path).
    pub fn iter_at_head(&self) -> RingIterator {
        RingIterator {
            pos: self.header().head,
        }
    }

    pub fn iter_at(&self, pos: u64) -> RingIterator {
        RingIterator { pos }
    }

    fn read_wrapped(&self, from: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        for i in 0..len {
            out[i] = self.buf[HEADER_LEN + ((from - HEADER_LEN + i) % self.capacity)];
        }
        out
    }

    /// Reads the next record, copying its payload out of the mapped region
    /// *before* re-checking `tail` against the iterator's position, to
    /// defeat the write race where the writer evicts the slot mid-copy
    /// (§4.3: "copies it out... before re-validating the iterator's
    /// generation"). Returns `Ok(None)` if there is nothing new yet.
    pub fn next(&self, it: &mut RingIterator) -> Result<Option<(i64, i32, Vec<u8>)>> {
        let h = self.header();
        if it.pos < h.tail {
            return Err(Error::RingInvalidated);
        }
        if it.pos >= h.head {
            return Ok(None);
        }
        let rec_header = self.read_wrapped(HEADER_LEN + (it.pos as usize % self.capacity), RECORD_HEADER_LEN);
        let seq = i64::from_le_bytes(rec_header[0..8].try_into().unwrap());
        let msgid = i32::from_le_bytes(rec_header[8..12].try_into().unwrap());
        let payload_len = u32::from_le_bytes(rec_header[12..16].try_into().unwrap()) as usize;
        let payload = self.read_wrapped(
            HEADER_LEN + ((it.pos as usize + RECORD_HEADER_LEN) % self.capacity),
            payload_len,
        );

        let h2 = self.header();
        if it.pos < h2.tail {
            return Err(Error::RingInvalidated);
        }

        it.pos += align8(RECORD_HEADER_LEN + payload_len) as u64;
        Ok(Some((seq, msgid, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_in_order() {
        let mut storage = vec![0u8; HEADER_LEN + 256];
        let mut writer = MemRingWriter::init(&mut storage).unwrap();
        for n in 1..=5i64 {
            writer.push(n, 7, format!("payload-{n}").as_bytes()).unwrap();
        }
        drop(writer);

        let reader = MemRingReader::open(&storage).unwrap();
        assert_eq!(reader.header().magic, RING_MAGIC);
        let mut it = reader.iter_at(0);
        let mut got = Vec::new();
        while let Some((seq, _msgid, payload)) = reader.next(&mut it).unwrap() {
            got.push((seq, payload));
        }
        assert_eq!(got.len(), 5);
        for (i, (seq, payload)) in got.iter().enumerate() {
            assert_eq!(*seq, i as i64 + 1);
            assert_eq!(payload, format!("payload-{}", i + 1).as_bytes());
        }
    }

    #[test]
    fn overflowing_writer_evicts_and_invalidates_stale_reader() {
        let mut storage = vec![0u8; HEADER_LEN + 64];
        let mut writer = MemRingWriter::init(&mut storage).unwrap();
        writer.push(1, 1, &[0u8; 8]).unwrap();
        drop(writer);
        let reader = MemRingReader::open(&storage).unwrap();
        let mut it = reader.iter_at(0);

        let mut writer = MemRingWriter::init_existing(&mut storage);
        for n in 2..=20i64 {
            writer.push(n, 1, &[0u8; 8]).unwrap();
        }
        drop(writer);

        let err = reader.next(&mut it).unwrap_err();
        assert!(matches!(err, Error::RingInvalidated));
    }
}

impl<'a> MemRingWriter<'a> {
    /// Re-wraps an already-initialised region (used by tests and by the
    /// processor when reopening its own writer handle after a crash-free
    /// restart).
    pub fn init_existing(buf: &'a mut [u8]) -> Self {
        let capacity = buf.len() - HEADER_LEN;
        MemRingWriter { buf, capacity }
    }
}
