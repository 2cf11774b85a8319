//! The processor (component I, §4.5): reads an `objects.*` config tree,
//! builds the dependency graph, assigns each object to a worker thread, and
//! drives dependency-ordered activation and decay through plain
//! `std::sync::mpsc` control messages.

mod deps;
mod graph;
mod ipc;
mod reopen;
mod worker;

pub use deps::{compute_depth, order_by_depth, DepSpec};
pub use graph::{DependencyGraph, ShutdownOn};
pub use ipc::{Downstream, UserControl, Upstream};
pub use reopen::{ReopenPolicy, ReopenState, ReopenTrigger};

use crate::channel::{Channel, State};
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{info, warn};

struct ObjectSpec {
    worker: String,
}

/// Owns the worker threads, the dependency graph, and each object's reopen
/// policy. Construct with [`Processor::build`] from a parsed config tree,
/// then [`Processor::run`] to drive it to completion (every object closed,
/// or `Ctrl-C` delivered through [`Processor::request_shutdown`]).
pub struct Processor {
    graph: DependencyGraph,
    objects: HashMap<String, ObjectSpec>,
    reopen: HashMap<String, ReopenState>,
    workers: HashMap<String, (Sender<Downstream>, JoinHandle<()>)>,
    upstream_rx: Receiver<Upstream>,
    shutting_down: bool,
}

impl Processor {
    /// Builds the full object graph from `config`'s `objects.*` subtree and
    /// spawns one worker per distinct `worker` key (default `"default"` for
    /// objects that don't set one), per §4.5 steps 1-4. Channels are built
    /// eagerly through `ctx`'s registered factories; dependency order only
    /// governs when they're told to `open()`, not when they're constructed.
    pub fn build(config: &Config, ctx: &Context) -> Result<Processor> {
        let objects_cfg = config
            .sub("objects")
            .ok_or_else(|| Error::MissingField("objects"))?;

        let mut dep_specs = HashMap::new();
        let mut per_object_config = HashMap::new();
        let mut worker_of = HashMap::new();

        for name in objects_cfg.root_keys() {
            let obj_cfg = objects_cfg
                .sub(&name)
                .ok_or_else(|| Error::MissingField("objects.<name>"))?;
            let url = obj_cfg
                .get("url")
                .ok_or_else(|| Error::MissingField("objects.<name>.url"))?;
            let (proto, _host, mut parsed) = crate::config::parse_url(url)?;
            for key in ["depends", "open-depends", "init-depends"] {
                if let Some(v) = obj_cfg.get(key) {
                    parsed.set(key, v);
                }
            }
            let worker = obj_cfg.get("worker").unwrap_or("default").to_string();
            worker_of.insert(name.clone(), worker);

            let open_deps = split_list(obj_cfg.get("open-depends").or_else(|| obj_cfg.get("depends")));
            let init_deps = split_list(obj_cfg.get("init-depends"));
            dep_specs.insert(name.clone(), DepSpec { init_deps, open_deps });
            per_object_config.insert(name.clone(), (proto, parsed));
        }

        let depth = compute_depth(
            &dep_specs
                .iter()
                .map(|(k, v)| (k.clone(), v.open_deps.clone()))
                .collect(),
        )?;
        let build_order = order_by_depth(&dep_specs.keys().cloned().collect::<Vec<_>>(), &depth);

        let graph = DependencyGraph::new(&dep_specs);
        let mut objects = HashMap::new();
        let mut built: HashMap<String, Vec<(String, Box<dyn Channel + Send>)>> = HashMap::new();

        for name in &build_order {
            let (proto, cfg) = &per_object_config[name];
            let channel = ctx.create_channel(name, proto, cfg)?;
            let worker = worker_of[name].clone();
            objects.insert(name.clone(), ObjectSpec { worker: worker.clone() });
            built.entry(worker).or_default().push((name.clone(), channel));
        }

        let (upstream_tx, upstream_rx) = mpsc::channel();
        let mut workers = HashMap::new();
        for (worker_name, channels) in built {
            let (cmd_tx, cmd_rx) = mpsc::channel();
            let join = worker::spawn(worker_name.clone(), channels, cmd_rx, upstream_tx.clone());
            workers.insert(worker_name, (cmd_tx, join));
        }

        let reopen = dep_specs
            .keys()
            .map(|n| (n.clone(), ReopenState::new(ReopenPolicy::default())))
            .collect();

        Ok(Processor {
            graph,
            objects,
            reopen,
            workers,
            upstream_rx,
            shutting_down: false,
        })
    }

    /// Activates every zero-dependency object. Call once after [`build`]
    /// (§4.5: "every object with zero open-dependencies receives an
    /// Activate").
    pub fn start(&mut self) -> Result<()> {
        for name in self.graph.roots() {
            self.activate(&name)?;
        }
        Ok(())
    }

    fn activate(&mut self, name: &str) -> Result<()> {
        let worker = &self
            .objects
            .get(name)
            .ok_or_else(|| Error::UnknownChannel(name.to_string()))?
            .worker;
        let (tx, _) = self
            .workers
            .get(worker)
            .ok_or_else(|| Error::UnknownChannel(worker.clone()))?;
        tx.send(Downstream::Activate { object: name.to_string() })
            .map_err(|_| Error::UnknownChannel(name.to_string()))?;
        Ok(())
    }

    /// Marks every object decayed and starts depth-first close propagation
    /// (§4.5 "Close / decay").
    pub fn request_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.graph.begin_decay();
        for name in self.graph.decay_ready() {
            self.deactivate(&name);
        }
    }

    fn deactivate(&mut self, name: &str) {
        let Some(spec) = self.objects.get(name) else { return };
        if let Some((tx, _)) = self.workers.get(&spec.worker) {
            let _ = tx.send(Downstream::Deactivate { object: name.to_string() });
        }
    }

    /// Processes one upstream event, blocking up to `timeout`. Returns
    /// `Ok(true)` if the processor should keep running, `Ok(false)` once
    /// every object has closed and shutdown was requested.
    pub fn poll_once(&mut self, timeout: std::time::Duration) -> Result<bool> {
        let event = match self.upstream_rx.recv_timeout(timeout) {
            Ok(e) => e,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.activate_due_reopens();
                return Ok(true);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(false),
        };

        match event {
            Upstream::ObjectState { object, state, .. } => {
                self.on_object_state(&object, state);
            }
            Upstream::WorkerState { worker, state } => {
                info!(worker, ?state, "worker reported state");
            }
            Upstream::WorkerExit { worker, code } => {
                info!(worker, code, "worker thread exited");
                self.workers.remove(&worker);
            }
        }

        self.activate_due_reopens();

        if self.shutting_down && self.graph.all_closed() {
            return Ok(false);
        }
        Ok(true)
    }

    /// Activates every object whose reopen backoff has elapsed (§4.5: "the
    /// pending-timer channel fires at the earliest `next_ts`"). Checked once
    /// per `poll_once` call, so the granularity is bounded by the caller's
    /// poll timeout.
    fn activate_due_reopens(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .reopen
            .iter()
            .filter(|(_, r)| r.next_ts().is_some_and(|t| t <= now))
            .map(|(name, _)| name.clone())
            .collect();
        for name in due {
            if let Some(r) = self.reopen.get_mut(&name) {
                r.clear_schedule();
            }
            if let Err(e) = self.activate(&name) {
                warn!(object = name, error = %e, "failed to activate object after reopen backoff");
            }
        }
    }

    fn on_object_state(&mut self, name: &str, state: State) {
        let reopen = self.reopen.get_mut(name);
        match state {
            State::Active => {
                self.graph.set_state(name, State::Active);
                if let Some(r) = reopen {
                    r.record_active(Instant::now());
                }
                for unlocked in self.graph.on_active(name) {
                    if let Err(e) = self.activate(&unlocked) {
                        warn!(object = unlocked, error = %e, "failed to activate dependent");
                    }
                }
            }
            State::Closed => {
                self.graph.set_state(name, State::Closed);
                if self.shutting_down {
                    for ready in self.graph.on_closed(name) {
                        self.deactivate(&ready);
                    }
                } else if let Some(r) = reopen {
                    // `ClosedCleanly` always schedules a zero-length
                    // timeout, so this is picked up by the very next
                    // `activate_due_reopens` call.
                    let _ = r.schedule(ReopenTrigger::ClosedCleanly, Instant::now());
                }
            }
            State::Error => {
                self.graph.set_state(name, State::Error);
                if !self.shutting_down {
                    if let Some(r) = reopen {
                        let trigger = if r.count() == 0 {
                            ReopenTrigger::ActiveToError
                        } else {
                            ReopenTrigger::OpeningFailed
                        };
                        let timeout = r.schedule(trigger, Instant::now());
                        info!(object = name, ?timeout, "scheduling reopen after error");
                    }
                }
            }
            _ => {}
        }
    }

    /// Tells every worker to exit and joins their threads.
    pub fn shutdown(self) {
        for (_, (tx, join)) in self.workers {
            let _ = tx.send(Downstream::Exit);
            let _ = join.join();
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelBase, StaticCaps};
    use std::time::Duration;

    #[derive(Debug)]
    struct DirectChannel {
        base: ChannelBase,
    }

    impl Channel for DirectChannel {
        fn base(&self) -> &ChannelBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut ChannelBase {
            &mut self.base
        }
        fn open(&mut self) -> Result<()> {
            self.base.set_state(State::Opening)?;
            self.base.set_state(State::Active)
        }
        fn process(&mut self) -> Result<bool> {
            Ok(false)
        }
        fn post(&mut self, _msg: &crate::message::Message) -> Result<()> {
            Ok(())
        }
        fn close(&mut self, _force: bool) -> Result<()> {
            if self.base.state() == State::Active {
                self.base.set_state(State::Closing)?;
            }
            self.base.set_state(State::Closed)
        }
    }

    fn test_ctx() -> Context {
        let ctx = Context::new();
        ctx.register_factory(
            "direct",
            std::sync::Arc::new(|name: &str, _cfg: &Config| {
                Ok(Box::new(DirectChannel {
                    base: ChannelBase::new(name, "direct", StaticCaps::INPUT | StaticCaps::OUTPUT),
                }) as Box<dyn Channel + Send>)
            }),
        );
        ctx
    }

    #[test]
    fn builds_activates_and_shuts_down_a_two_object_graph() {
        let config = Config::from_yaml_str(
            "objects:\n  a:\n    url: direct://\n  b:\n    url: direct://\n    depends: a\n",
        )
        .unwrap();
        let ctx = test_ctx();
        let mut processor = Processor::build(&config, &ctx).unwrap();
        processor.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if processor.graph.all_active(&["a".to_string(), "b".to_string()]) {
                break;
            }
            processor.poll_once(Duration::from_millis(50)).unwrap();
        }
        assert!(processor.graph.all_active(&["a".to_string(), "b".to_string()]));

        processor.request_shutdown();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut done = false;
        while Instant::now() < deadline {
            if !processor.poll_once(Duration::from_millis(50)).unwrap() {
                done = true;
                break;
            }
        }
        assert!(done, "processor did not reach all-closed before the deadline");
        processor.shutdown();
    }

    #[test]
    fn unknown_protocol_fails_build() {
        let config = Config::from_yaml_str("objects:\n  a:\n    url: mystery://\n").unwrap();
        let ctx = Context::new();
        assert!(matches!(
            Processor::build(&config, &ctx),
            Err(Error::UnknownProtocol(p)) if p == "mystery"
        ));
    }
}
