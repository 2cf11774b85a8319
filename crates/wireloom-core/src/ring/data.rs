//! In-process frame ring used by the TCP pub broadcast server (§3
//! "DataRing (TCP pub)"). A `VecDeque` of frames bounded by total payload
//! bytes stands in for the source's fixed frame-slot array plus contiguous
//! payload arena: client cursors address frames by sequence number rather
//! than by raw pointer, so "the iterator stays valid across pops as long as
//! its element has not been evicted" falls out of plain sequence-number
//! comparison instead of pointer bookkeeping.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: i64,
    pub msgid: i32,
    pub payload: Vec<u8>,
}

/// A client's read position into a [`DataRing`]. Not tied to the ring it was
/// created from; comparing `next_seq` against the ring's current bounds is
/// what detects eviction (§8: "Pub server eviction").
#[derive(Debug, Clone, Copy, Default)]
pub struct RingCursor {
    pub next_seq: i64,
}

pub enum Lookup<'a> {
    /// Nothing new since this cursor's position.
    Empty,
    /// The cursor fell behind the ring's oldest retained seq.
    OutOfData,
    Frame(&'a Frame),
}

pub struct DataRing {
    frames: VecDeque<Frame>,
    max_bytes: usize,
    used_bytes: usize,
}

impl DataRing {
    pub fn new(max_bytes: usize) -> Self {
        DataRing {
            frames: VecDeque::new(),
            max_bytes,
            used_bytes: 0,
        }
    }

    pub fn oldest_seq(&self) -> Option<i64> {
        self.frames.front().map(|f| f.seq)
    }

    pub fn newest_seq(&self) -> Option<i64> {
        self.frames.back().map(|f| f.seq)
    }

    pub fn pop_front(&mut self) -> Option<Frame> {
        let f = self.frames.pop_front()?;
        self.used_bytes -= f.payload.len();
        Some(f)
    }

    /// Frames `payload` into the ring, evicting from the front as needed to
    /// make room (§4.3: "`post(msg)` frames the message into the ring
    /// (evicting from the front if full)").
    pub fn push(&mut self, seq: i64, msgid: i32, payload: Vec<u8>) {
        while !self.frames.is_empty() && self.used_bytes + payload.len() > self.max_bytes {
            self.pop_front();
        }
        self.used_bytes += payload.len();
        self.frames.push_back(Frame { seq, msgid, payload });
    }

    /// Looks up the frame a cursor should read next, without mutating the
    /// cursor — the caller advances it only after a successful send.
    pub fn lookup(&self, cursor: RingCursor) -> Lookup<'_> {
        match self.oldest_seq() {
            None => Lookup::Empty,
            Some(oldest) if cursor.next_seq < oldest => Lookup::OutOfData,
            Some(oldest) => {
                let idx = (cursor.next_seq - oldest) as usize;
                match self.frames.get(idx) {
                    Some(f) => Lookup::Frame(f),
                    None => Lookup::Empty,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes currently held, for callers that gauge "mostly drained" against
    /// `max_bytes` (the stream client's replay/overlap handoff, §4.4: "the
    /// live ring has room ≥ half its capacity").
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_behind_oldest_is_out_of_data() {
        let mut ring = DataRing::new(64);
        for n in 1..=20i64 {
            ring.push(n, 1, vec![0u8; 8]);
        }
        // ring can hold only 8 frames of 8 bytes; oldest retained is 13.
        assert_eq!(ring.oldest_seq(), Some(13));
        assert!(matches!(ring.lookup(RingCursor { next_seq: 1 }), Lookup::OutOfData));
        assert!(matches!(ring.lookup(RingCursor { next_seq: 13 }), Lookup::Frame(_)));
    }

    #[test]
    fn cursor_at_seq_equal_to_oldest_still_succeeds_when_full() {
        // §8 "Pub server eviction": if the ring is full and a client's
        // sent_seq equals the oldest seq, post() still succeeds and the
        // client is only failed on its next process, not synchronously.
        let mut ring = DataRing::new(16);
        ring.push(1, 1, vec![0u8; 8]);
        ring.push(2, 1, vec![0u8; 8]);
        let cursor = RingCursor { next_seq: 1 };
        ring.push(3, 1, vec![0u8; 8]); // evicts seq=1
        assert!(matches!(ring.lookup(cursor), Lookup::OutOfData));
    }
}
