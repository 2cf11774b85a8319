//! The mmap-backed pub broadcast server (§4.3 "Pub memring (shared-memory)",
//! §6 persisted layout). Writes go through [`wireloom_core::ring::mem::MemRingWriter`]
//! over a `memmap2::MmapMut` of the target file; the file is built in a temp
//! location and renamed into place so a concurrently-opening reader never
//! observes a partially-initialised header.

use memmap2::{MmapMut, MmapOptions};
use std::path::PathBuf;
use wireloom_core::channel::{Channel, ChannelBase, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::message::{Message, MsgType};
use wireloom_core::ring::mem::MemRingWriter;

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

pub struct PubMemServer {
    base: ChannelBase,
    path: PathBuf,
    size: usize,
    mmap: Option<MmapMut>,
    next_seq: i64,
}

impl std::fmt::Debug for PubMemServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubMemServer").field("base", &self.base).field("path", &self.path).finish()
    }
}

impl PubMemServer {
    pub fn new(name: &str, proto: &str, host: &str, cfg: &Config) -> PubMemServer {
        let mut base = ChannelBase::new(name, proto, StaticCaps::OUTPUT);
        *base.config_mut() = cfg.clone();
        let size = cfg.get("size").and_then(parse_size).unwrap_or(64 * 1024);
        PubMemServer {
            base,
            path: PathBuf::from(host),
            size,
            mmap: None,
            next_seq: 0,
        }
    }
}

impl Channel for PubMemServer {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }

    fn open(&mut self) -> wireloom_core::Result<()> {
        self.base.set_state(State::Opening)?;
        let total = wireloom_core::ring::mem::HEADER_LEN + self.size;
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.as_file().set_len(total as u64)?;
        let mut mmap = unsafe { MmapOptions::new().len(total).map_mut(tmp.as_file())? };
        MemRingWriter::init(&mut mmap[..])?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        self.mmap = Some(mmap);
        self.base.set_state(State::Active)?;
        Ok(())
    }

    fn process(&mut self) -> wireloom_core::Result<bool> {
        Ok(false)
    }

    fn post(&mut self, msg: &Message) -> wireloom_core::Result<()> {
        if msg.ty != MsgType::Data {
            return Ok(());
        }
        let Some(mmap) = self.mmap.as_mut() else {
            return Err(wireloom_core::Error::NoFd(self.base.name().to_string()));
        };
        let seq = if msg.seq != 0 { msg.seq } else { self.next_seq };
        self.next_seq = seq + 1;
        let mut writer = MemRingWriter::init_existing(&mut mmap[..]);
        writer.push(seq, msg.msgid, &msg.data)?;
        Ok(())
    }

    fn close(&mut self, _force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        self.mmap = None;
        let _ = std::fs::remove_file(&self.path);
        if self.base.state() != State::Closed {
            self.base.set_state(State::Closed)?;
        }
        Ok(())
    }
}
