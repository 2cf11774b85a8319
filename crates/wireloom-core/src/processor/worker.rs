//! A worker (§3 Data Model "Worker"): a long-lived thread owning one
//! [`EventLoop`] and a disjoint subset of objects, addressable by the
//! processor purely through [`Downstream`]/[`Upstream`] IPC messages.

use super::ipc::{Downstream, Upstream};
use crate::channel::{Channel, State};
use crate::evloop::EventLoop;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Spawns a worker thread for `channels`, consuming commands off `cmd_rx`
/// and reporting state changes on `events_tx` until it receives
/// [`Downstream::Exit`] and every owned channel has closed.
pub fn spawn(
    name: String,
    channels: Vec<(String, Box<dyn Channel + Send>)>,
    cmd_rx: Receiver<Downstream>,
    events_tx: Sender<Upstream>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("wireloom-worker-{name}"))
        .spawn(move || run_worker(name, channels, cmd_rx, events_tx))
        .expect("failed to spawn worker thread")
}

fn run_worker(
    name: String,
    channels: Vec<(String, Box<dyn Channel + Send>)>,
    cmd_rx: Receiver<Downstream>,
    events_tx: Sender<Upstream>,
) {
    let mut evloop = EventLoop::new().expect("event loop init");
    let mut last_state: HashMap<String, State> = HashMap::new();
    for (obj_name, channel) in channels {
        last_state.insert(obj_name.clone(), channel.base().state());
        evloop.add(channel);
    }

    let _ = events_tx.send(Upstream::WorkerState {
        worker: name.clone(),
        state: State::Active,
    });

    let mut stopping = false;
    loop {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Downstream::Activate { object } => {
                    if let Some(ch) = evloop.channel_mut(&object) {
                        if let Err(e) = ch.open() {
                            warn!(worker = %name, object, error = %e, "open() failed");
                        }
                    }
                }
                Downstream::Deactivate { object } => {
                    if let Some(ch) = evloop.channel_mut(&object) {
                        if let Err(e) = ch.close(false) {
                            warn!(worker = %name, object, error = %e, "close() failed");
                        }
                    }
                }
                Downstream::Exit => {
                    stopping = true;
                }
            }
        }

        if stopping {
            for obj_name in last_state.keys() {
                if let Some(ch) = evloop.channel_mut(obj_name) {
                    if ch.base().state() != State::Closed && ch.base().state() != State::Destroy {
                        let _ = ch.close(true);
                    }
                }
            }
        }

        let _ = evloop.step(Duration::from_millis(50));

        for (obj_name, prev) in last_state.iter_mut() {
            if let Some(ch) = evloop.channel_mut(obj_name) {
                let cur = ch.base().state();
                if cur != *prev {
                    *prev = cur;
                    let _ = events_tx.send(Upstream::ObjectState {
                        object: obj_name.clone(),
                        worker: name.clone(),
                        state: cur,
                    });
                }
            }
        }

        if stopping && last_state.values().all(|s| matches!(s, State::Closed | State::Destroy)) {
            break;
        }
    }

    info!(worker = %name, "worker exiting");
    let _ = events_tx.send(Upstream::WorkerExit { worker: name, code: 0 });
}
