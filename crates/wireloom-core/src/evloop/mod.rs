//! The event loop (component E): fd-multiplexed + fd-less cooperative
//! scheduling with a pending-data fast path, per §4.2.
//!
//! One `EventLoop` runs on a dedicated thread (a `Worker`, or the processor
//! itself) and owns a disjoint set of channels. Scheduling inside one loop
//! is strictly sequential; parallelism only comes from running several
//! loops on several threads.

use crate::channel::{Channel, Dcaps, State};
use crate::error::Result;
use crate::message::channel_meta;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{error, trace, warn};

struct Slot {
    channel: Box<dyn Channel + Send>,
    registered: Option<(RawFd, Interest)>,
}

/// fd poll + pending list + fd-less list, all folded into one scan over the
/// registered slots each step (§4.2). Kept as one pass rather than three
/// separate lists because the slot count per worker is small and a single
/// `HashMap` scan is simpler to keep consistent with dcap changes than
/// maintaining three separately-indexed membership sets.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    slots: HashMap<Token, Slot>,
    name_to_token: HashMap<String, Token>,
    next_token: usize,
    pub stop: bool,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Ok(EventLoop {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            slots: HashMap::new(),
            name_to_token: HashMap::new(),
            next_token: 1,
            stop: false,
        })
    }

    pub fn add(&mut self, channel: Box<dyn Channel + Send>) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.name_to_token.insert(channel.name().to_string(), token);
        self.slots.insert(
            token,
            Slot {
                channel,
                registered: None,
            },
        );
        self.reconcile(token);
        token
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Box<dyn Channel + Send>> {
        let token = self.name_to_token.remove(name)?;
        self.remove(token)
    }

    fn remove(&mut self, token: Token) -> Option<Box<dyn Channel + Send>> {
        let slot = self.slots.remove(&token)?;
        if let Some((fd, _)) = slot.registered {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
        Some(slot.channel)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut (dyn Channel + Send)> {
        let token = *self.name_to_token.get(name)?;
        self.slots.get_mut(&token).map(|s| &mut *s.channel)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Runs until `self.stop` is set, polling with `timeout` each step
    /// (§5: "`run(timeout)` polls with the given timeout; `stop=true` exits
    /// at the next boundary").
    pub fn run(&mut self, timeout: Duration) -> Result<()> {
        while !self.stop {
            self.step(timeout)?;
        }
        Ok(())
    }

    /// One iteration of the loop step described in §4.2.
    pub fn step(&mut self, timeout: Duration) -> Result<()> {
        let any_pending = self.slots.values().any(|s| s.channel.base().dcaps().contains(Dcaps::PENDING));
        let effective_timeout = if any_pending { Duration::ZERO } else { timeout };

        self.events.clear();
        match self.poll.poll(&mut self.events, Some(effective_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let ready_tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
        for token in ready_tokens {
            self.process_token(token);
        }

        // PENDING and fd-less (list_nofd) channels are processed on every
        // step regardless of what the poll returned.
        let due: Vec<Token> = self
            .slots
            .iter()
            .filter(|(_, s)| {
                let d = s.channel.base().dcaps();
                d.need_process() && (d.contains(Dcaps::PENDING) || s.channel.base().fd().is_none())
            })
            .map(|(t, _)| *t)
            .collect();
        for token in due {
            self.process_token(token);
        }

        let destroyed: Vec<Token> = self
            .slots
            .iter()
            .filter(|(_, s)| s.channel.base().state() == State::Destroy)
            .map(|(t, _)| *t)
            .collect();
        for token in destroyed {
            self.remove(token);
        }

        Ok(())
    }

    fn process_token(&mut self, token: Token) {
        let Some(slot) = self.slots.get_mut(&token) else { return };
        if !slot.channel.base().dcaps().need_process() {
            return;
        }
        match slot.channel.process() {
            Ok(_progressed) => {}
            Err(e) => {
                error!(channel = %slot.channel.name(), error = %e, "process() failed, transitioning to Error");
                let _ = slot.channel.base_mut().set_state(State::Error);
            }
        }
        let meta = slot.channel.base_mut().drain_meta();
        let needs_reconcile = meta
            .iter()
            .any(|m| m.msgid == channel_meta::UPDATE || m.msgid == channel_meta::UPDATE_FD);
        if needs_reconcile {
            self.reconcile(token);
        }
    }

    /// Re-derives the mio registration for a slot from its current dcaps/fd,
    /// per the level-triggered semantics in §4.2 (POLLOUT requested only
    /// while there is buffered unsent data; POLLIN is the default).
    fn reconcile(&mut self, token: Token) {
        let Some(slot) = self.slots.get_mut(&token) else { return };
        let dcaps = slot.channel.base().dcaps();
        let fd = slot.channel.base().fd();

        let wanted = match fd {
            Some(fd) if !dcaps.suspended() => {
                let mut interest = None;
                if dcaps.contains(Dcaps::POLLIN) {
                    interest = Some(Interest::READABLE);
                }
                if dcaps.contains(Dcaps::POLLOUT) {
                    interest = Some(interest.map_or(Interest::WRITABLE, |i| i | Interest::WRITABLE));
                }
                interest.map(|i| (fd, i))
            }
            _ => None,
        };

        match (slot.registered, wanted) {
            (None, Some((fd, interest))) => {
                if self
                    .poll
                    .registry()
                    .register(&mut SourceFd(&fd), token, interest)
                    .is_ok()
                {
                    slot.registered = Some((fd, interest));
                }
            }
            (Some((old_fd, old_interest)), Some((fd, interest))) => {
                if old_fd != fd {
                    let _ = self.poll.registry().deregister(&mut SourceFd(&old_fd));
                    if self
                        .poll
                        .registry()
                        .register(&mut SourceFd(&fd), token, interest)
                        .is_ok()
                    {
                        slot.registered = Some((fd, interest));
                    }
                } else if old_interest != interest {
                    let _ = self.poll.registry().reregister(&mut SourceFd(&fd), token, interest);
                    slot.registered = Some((fd, interest));
                }
            }
            (Some((old_fd, _)), None) => {
                let _ = self.poll.registry().deregister(&mut SourceFd(&old_fd));
                slot.registered = None;
            }
            (None, None) => {}
        }
        trace!(token = token.0, ?dcaps, ?fd, "reconciled loop registration");
    }
}
