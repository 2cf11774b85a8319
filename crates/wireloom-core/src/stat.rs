//! Stat blocks and drain logic (component K). Two pre-allocated pages per
//! block; swapping which one is "active" is a single atomic pointer
//! exchange (`arc_swap::ArcSwap`, grounded in the teacher's own use of
//! `arc_swap` for exactly this kind of hot-path/inactive-page split), so the
//! draining thread only ever touches the page no longer receiving updates.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct StatPage {
    counters: HashMap<&'static str, AtomicI64>,
}

impl StatPage {
    fn new(fields: &[&'static str]) -> Self {
        StatPage {
            counters: fields.iter().map(|&f| (f, AtomicI64::new(0))).collect(),
        }
    }

    pub fn get(&self, field: &str) -> i64 {
        self.counters
            .get(field)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<&'static str, i64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.load(Ordering::Relaxed)))
            .collect()
    }
}

/// A single named counter block (one per channel, typically). Call
/// [`StatBlock::incr`] from the owning loop thread on every step; call
/// [`StatBlock::drain`] periodically from any thread to rotate pages.
pub struct StatBlock {
    fields: Vec<&'static str>,
    active: ArcSwap<StatPage>,
}

impl StatBlock {
    pub fn new(fields: &[&'static str]) -> Self {
        StatBlock {
            fields: fields.to_vec(),
            active: ArcSwap::from_pointee(StatPage::new(fields)),
        }
    }

    pub fn incr(&self, field: &str, delta: i64) {
        let page = self.active.load();
        if let Some(counter) = page.counters.get(field) {
            counter.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Swaps in a fresh zeroed page and returns the page that was active,
    /// for the caller to read and report (e.g. log at `debug!`).
    pub fn drain(&self) -> Arc<StatPage> {
        let fresh = Arc::new(StatPage::new(&self.fields));
        self.active.swap(fresh)
    }

    pub fn peek(&self) -> Arc<StatPage> {
        self.active.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_accumulated_page_and_resets() {
        let stat = StatBlock::new(&["rx", "tx"]);
        stat.incr("rx", 3);
        stat.incr("rx", 4);
        stat.incr("tx", 1);

        let drained = stat.drain();
        assert_eq!(drained.get("rx"), 7);
        assert_eq!(drained.get("tx"), 1);

        stat.incr("rx", 1);
        assert_eq!(stat.peek().get("rx"), 1, "new page starts from zero");
    }
}
