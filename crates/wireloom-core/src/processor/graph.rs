//! Dependency-ordered activation and decay propagation (§4.5 "Open
//! sequence" and "Close / decay"), independent of the actual workers and
//! transport so it can be driven and tested as a pure state machine.

use super::deps::DepSpec;
use crate::channel::State;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOn {
    None,
    Close,
    Error,
}

#[derive(Debug)]
struct Node {
    open_deps: Vec<String>,
    /// Names that depend on this one via open-deps (reverse edges), used to
    /// drive decay propagation.
    dependents: Vec<String>,
    state: State,
    decayed: bool,
    shutdown_on: ShutdownOn,
}

/// Tracks object states and derives, from state transitions, which objects
/// become eligible to activate or to close next. Does not itself send IPC —
/// callers (the [`super::Processor`]) turn the returned names into
/// `Activate`/`Deactivate` messages.
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
}

impl DependencyGraph {
    pub fn new(specs: &HashMap<String, DepSpec>) -> Self {
        let mut nodes: HashMap<String, Node> = specs
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    Node {
                        open_deps: spec.open_deps.clone(),
                        dependents: Vec::new(),
                        state: State::Closed,
                        decayed: false,
                        shutdown_on: ShutdownOn::None,
                    },
                )
            })
            .collect();
        let edges: Vec<(String, String)> = nodes
            .iter()
            .flat_map(|(name, n)| n.open_deps.iter().map(move |d| (d.clone(), name.clone())))
            .collect();
        for (dep, dependent) in edges {
            if let Some(n) = nodes.get_mut(&dep) {
                n.dependents.push(dependent);
            }
        }
        DependencyGraph { nodes }
    }

    pub fn set_shutdown_on(&mut self, name: &str, policy: ShutdownOn) {
        if let Some(n) = self.nodes.get_mut(name) {
            n.shutdown_on = policy;
        }
    }

    /// Names with zero open-dependencies — activated unconditionally at
    /// processor startup (§4.5 "every object with zero open-dependencies
    /// receives an Activate").
    pub fn roots(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.open_deps.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn deps_all_active(&self, name: &str) -> bool {
        self.nodes
            .get(name)
            .map(|n| {
                n.open_deps
                    .iter()
                    .all(|d| self.nodes.get(d).map(|dn| dn.state == State::Active).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    /// Call when `name` transitions to Active. Returns the names that are
    /// now activatable: every dependent whose *entire* dependency set is
    /// Active (§4.5, §8 "Dependency activation order").
    pub fn on_active(&mut self, name: &str) -> Vec<String> {
        if let Some(n) = self.nodes.get_mut(name) {
            n.state = State::Active;
        }
        let dependents = self.nodes.get(name).map(|n| n.dependents.clone()).unwrap_or_default();
        dependents
            .into_iter()
            .filter(|d| self.deps_all_active(d))
            .collect()
    }

    pub fn set_state(&mut self, name: &str, state: State) {
        if let Some(n) = self.nodes.get_mut(name) {
            n.state = state;
        }
    }

    pub fn state(&self, name: &str) -> Option<State> {
        self.nodes.get(name).map(|n| n.state)
    }

    pub fn all_active(&self, names: &[String]) -> bool {
        names.iter().all(|n| self.state(n) == Some(State::Active))
    }

    /// Marks every object as decayed (§4.5 "close() marks every object as
    /// decayed").
    pub fn begin_decay(&mut self) {
        for n in self.nodes.values_mut() {
            n.decayed = true;
        }
    }

    /// Objects with no dependents left open — decay can close them now. A
    /// leaf (no dependents at all) is always eligible once decay begins.
    pub fn decay_ready(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| {
                n.decayed
                    && n.state != State::Closed
                    && n.dependents
                        .iter()
                        .all(|d| self.nodes.get(d).map(|dn| dn.state == State::Closed).unwrap_or(true))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Call when `name` reaches Closed during decay. Returns the names now
    /// eligible to close because every one of *their* dependents is closed
    /// (§4.5: "Decay propagates depth-first through reverse dependencies").
    pub fn on_closed(&mut self, name: &str) -> Vec<String> {
        self.set_state(name, State::Closed);
        let mut ready = HashSet::new();
        for (dep_name, n) in &self.nodes {
            if n.decayed
                && n.state != State::Closed
                && n.dependents.contains(&name.to_string())
                && n.dependents
                    .iter()
                    .all(|d| self.nodes.get(d).map(|dn| dn.state == State::Closed).unwrap_or(true))
            {
                ready.insert(dep_name.clone());
            }
        }
        ready.into_iter().collect()
    }

    pub fn shutdown_on(&self, name: &str) -> ShutdownOn {
        self.nodes.get(name).map(|n| n.shutdown_on).unwrap_or(ShutdownOn::None)
    }

    pub fn all_closed(&self) -> bool {
        self.nodes.values().all(|n| n.state == State::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(open_deps: &[&str]) -> DepSpec {
        DepSpec {
            init_deps: Vec::new(),
            open_deps: open_deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn activation_order_matches_dependency_structure() {
        // A depends on nothing, B depends on A, C depends on A and B.
        let mut specs = HashMap::new();
        specs.insert("a".into(), spec(&[]));
        specs.insert("b".into(), spec(&["a"]));
        specs.insert("c".into(), spec(&["a", "b"]));
        let mut graph = DependencyGraph::new(&specs);

        assert_eq!(graph.roots(), vec!["a".to_string()]);

        let mut events = Vec::new();
        events.push(("a-active", ()));
        let unlocked = graph.on_active("a");
        assert_eq!(unlocked, vec!["b".to_string()], "C isn't unlocked yet, B's not active");

        events.push(("b-active", ()));
        let unlocked = graph.on_active("b");
        assert_eq!(unlocked, vec!["c".to_string()]);
        let _ = events;
    }

    #[test]
    fn decay_closes_leaves_before_roots() {
        let mut specs = HashMap::new();
        specs.insert("a".into(), spec(&[]));
        specs.insert("b".into(), spec(&["a"]));
        let mut graph = DependencyGraph::new(&specs);
        graph.set_state("a", State::Active);
        graph.set_state("b", State::Active);
        graph.begin_decay();

        // b has no dependents, so it is ready first; a is not (b still open).
        assert_eq!(graph.decay_ready(), vec!["b".to_string()]);
        let newly_ready = graph.on_closed("b");
        assert_eq!(newly_ready, vec!["a".to_string()]);
    }
}
