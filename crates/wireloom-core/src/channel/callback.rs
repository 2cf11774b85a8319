use crate::message::{Message, MsgMask, MsgType};
use std::hash::Hash;

/// Opaque handle returned by registration, consumed by removal. Replaces the
/// (function-pointer, user-pointer) identity pair from the source design
/// (Design Notes: "callback identity via pair") with a safe token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

pub type Callback = Box<dyn FnMut(&Message) + Send>;

struct DataEntry<K> {
    key: K,
    handle: CallbackHandle,
    cb: Callback,
}

struct OtherEntry<K> {
    key: K,
    handle: CallbackHandle,
    mask: MsgMask,
    cb: Callback,
}

/// Two fan-out lists: a fast path invoked only on Data messages, and a
/// masked list invoked for every message type the registrant asked for.
/// Re-registering the same key extends the existing entry's mask instead of
/// duplicating it (§4.1 callback registry contract, tested by §8's
/// callback fan-out invariant).
pub struct CallbackRegistry<K: Eq + Hash + Clone> {
    data: Vec<DataEntry<K>>,
    other: Vec<OtherEntry<K>>,
    next: u64,
}

impl<K: Eq + Hash + Clone> Default for CallbackRegistry<K> {
    fn default() -> Self {
        CallbackRegistry {
            data: Vec::new(),
            other: Vec::new(),
            next: 1,
        }
    }
}

impl<K: Eq + Hash + Clone> CallbackRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_handle(&mut self) -> CallbackHandle {
        let h = CallbackHandle(self.next);
        self.next += 1;
        h
    }

    /// Fast path: invoked only for `Data` messages.
    pub fn add_data(&mut self, key: K, cb: Callback) -> CallbackHandle {
        if let Some(existing) = self.data.iter().find(|e| e.key == key) {
            return existing.handle;
        }
        let handle = self.alloc_handle();
        self.data.push(DataEntry { key, handle, cb });
        handle
    }

    /// Masked path: invoked for every message type in `mask`. Re-registering
    /// the same key merges masks instead of adding a second entry.
    pub fn add(&mut self, key: K, mask: MsgMask, cb: Callback) -> CallbackHandle {
        if let Some(existing) = self.other.iter_mut().find(|e| e.key == key) {
            existing.mask = existing.mask.union(mask);
            return existing.handle;
        }
        let handle = self.alloc_handle();
        self.other.push(OtherEntry {
            key,
            handle,
            mask,
            cb,
        });
        handle
    }

    pub fn remove(&mut self, key: &K) {
        self.data.retain(|e| &e.key != key);
        self.other.retain(|e| &e.key != key);
    }

    pub fn remove_handle(&mut self, handle: CallbackHandle) {
        self.data.retain(|e| e.handle != handle);
        self.other.retain(|e| e.handle != handle);
    }

    /// Dispatch a message to every matching callback, in registration order.
    /// State messages are delivered to masked callbacks even when a
    /// registrant's mask excludes Data (§4.1: "State messages are delivered
    /// even when callback mask excludes Data").
    pub fn dispatch(&mut self, msg: &Message) {
        if msg.ty == MsgType::Data {
            for entry in &mut self.data {
                (entry.cb)(msg);
            }
        }
        for entry in &mut self.other {
            if entry.mask.contains(msg.ty) {
                (entry.cb)(msg);
            }
        }
    }

    pub fn data_count(&self) -> usize {
        self.data.len()
    }

    pub fn other_count(&self) -> usize {
        self.other.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn reregistering_same_key_merges_mask_not_duplicates() {
        let mut reg: CallbackRegistry<&'static str> = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        reg.add(
            "cb",
            MsgMask::of(MsgType::Control),
            Box::new(move |m| seen2.lock().unwrap().push(m.ty)),
        );
        let seen3 = seen.clone();
        reg.add(
            "cb",
            MsgMask::of(MsgType::State),
            Box::new(move |m| seen3.lock().unwrap().push(m.ty)),
        );
        assert_eq!(reg.other_count(), 1, "must merge, not duplicate");

        reg.dispatch(&Message::control(1, vec![]));
        reg.dispatch(&Message::state(2));
        reg.dispatch(&Message::data(1, 1, vec![]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "invoked once per message in the merged mask");
        assert!(seen.contains(&MsgType::Control));
        assert!(seen.contains(&MsgType::State));
    }

    #[test]
    fn state_delivered_even_when_mask_excludes_data() {
        let mut reg: CallbackRegistry<u32> = CallbackRegistry::new();
        let hits = Arc::new(Mutex::new(0));
        let hits2 = hits.clone();
        reg.add(
            1,
            MsgMask::of(MsgType::State),
            Box::new(move |_| *hits2.lock().unwrap() += 1),
        );
        reg.dispatch(&Message::data(1, 1, vec![]));
        assert_eq!(*hits.lock().unwrap(), 0);
        reg.dispatch(&Message::state(3));
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
