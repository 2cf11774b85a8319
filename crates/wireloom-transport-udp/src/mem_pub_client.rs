//! The mmap-backed pub broadcast client (§4.3 "Pub memring (shared-memory)").
//! Opens the same file read-only, verifies the magic, and positions an
//! iterator at the ring head (live-feed semantics — it does not replay
//! history already evicted or already written before it opened). Each
//! `process()` call reads at most one record, matching the source
//! ("`process()` reads one record... and emits Data") rather than draining
//! everything in one call, so a fast producer cannot starve sibling channels
//! on the same loop.

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::PathBuf;
use wireloom_core::channel::{ChannelBase, Channel, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{Message, Peer};
use wireloom_core::ring::mem::{MemRingReader, RingIterator};

pub struct PubMemClient {
    base: ChannelBase,
    path: PathBuf,
    mmap: Option<Mmap>,
    iter: Option<RingIterator>,
}

impl std::fmt::Debug for PubMemClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubMemClient").field("base", &self.base).field("path", &self.path).finish()
    }
}

impl PubMemClient {
    pub fn new(name: &str, proto: &str, host: &str, cfg: &Config) -> PubMemClient {
        let mut base = ChannelBase::new(name, proto, StaticCaps::INPUT);
        *base.config_mut() = cfg.clone();
        PubMemClient {
            base,
            path: PathBuf::from(host),
            mmap: None,
            iter: None,
        }
    }
}

impl Channel for PubMemClient {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> wireloom_core::Result<()> {
        self.base.set_state(State::Opening)?;
        let file = File::open(&self.path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let reader = MemRingReader::open(&mmap)?;
        self.iter = Some(reader.iter_at_head());
        self.mmap = Some(mmap);
        self.base.add_dcaps(Dcaps::PROCESS | Dcaps::PENDING);
        self.base.set_state(State::Active)?;
        Ok(())
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        let (Some(mmap), Some(it)) = (self.mmap.as_ref(), self.iter.as_mut()) else {
            return Ok(false);
        };
        let reader = MemRingReader::open(mmap)?;
        match reader.next(it)? {
            Some((seq, msgid, payload)) => {
                self.base.emit_data(msgid, seq, Peer::None, payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn post(&mut self, _msg: &Message) -> wireloom_core::Result<()> {
        Err(wireloom_core::Error::Protocol("pub memring client is read-only".into()))
    }

    fn close(&mut self, _force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        self.iter = None;
        self.mmap = None;
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}
