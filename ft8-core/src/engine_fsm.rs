//! Engine Lifecycle FSM (C10): ordered resource start/stop with
//! rollback on startup failure (§4.10).
//!
//! Resources are registered with declared dependencies up front; the
//! FSM itself stays a pure `match (state, event)` function exactly like
//! C7/C9, while the *driver* (engine.rs) performs the actual starts,
//! stops, and timeouts around it (§5).

use std::collections::{HashMap, HashSet};

use crate::errors::LifecycleError;
use crate::events::{EngineFsmEvent, EngineFsmState};

/// Whether a resource is required for the engine to be considered
/// running, or may fail without aborting the whole start (§4.10,
/// "optional resources ... may fail without aborting the whole start").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Required,
    Optional,
}

#[derive(Debug, Clone)]
struct ResourceSpec {
    name: String,
    depends_on: Vec<String>,
    kind: ResourceKind,
}

/// A registry of named resources with dependency edges, resolved into a
/// start order (topological) and its exact reverse for stop order.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    specs: Vec<ResourceSpec>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, depends_on: &[&str], kind: ResourceKind) {
        self.specs.push(ResourceSpec {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            kind,
        });
    }

    pub fn kind_of(&self, name: &str) -> Option<ResourceKind> {
        self.specs.iter().find(|s| s.name == name).map(|s| s.kind)
    }

    /// Resolves a start order honoring dependencies (a dependency always
    /// starts before its dependents). Rejects circular dependencies with
    /// an explicit error (§4.10).
    pub fn start_order(&self) -> Result<Vec<String>, LifecycleError> {
        let by_name: HashMap<&str, &ResourceSpec> =
            self.specs.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut order = Vec::with_capacity(self.specs.len());
        let mut visited: HashSet<String> = HashSet::new();
        let mut visiting: Vec<String> = Vec::new();

        fn visit(
            name: &str,
            by_name: &HashMap<&str, &ResourceSpec>,
            visited: &mut HashSet<String>,
            visiting: &mut Vec<String>,
            order: &mut Vec<String>,
        ) -> Result<(), LifecycleError> {
            if visited.contains(name) {
                return Ok(());
            }
            if visiting.contains(&name.to_string()) {
                let mut cycle = visiting.clone();
                cycle.push(name.to_string());
                return Err(LifecycleError::CircularDependency(cycle));
            }
            visiting.push(name.to_string());
            if let Some(spec) = by_name.get(name) {
                for dep in &spec.depends_on {
                    visit(dep, by_name, visited, visiting, order)?;
                }
            }
            visiting.pop();
            visited.insert(name.to_string());
            order.push(name.to_string());
            Ok(())
        }

        for spec in &self.specs {
            visit(&spec.name, &by_name, &mut visited, &mut visiting, &mut order)?;
        }
        Ok(order)
    }

    pub fn stop_order(&self) -> Result<Vec<String>, LifecycleError> {
        let mut order = self.start_order()?;
        order.reverse();
        Ok(order)
    }
}

pub struct EngineFsm {
    state: EngineFsmState,
}

impl EngineFsm {
    pub fn new() -> Self {
        Self {
            state: EngineFsmState::Idle,
        }
    }

    pub fn state(&self) -> EngineFsmState {
        self.state
    }

    pub fn apply(&mut self, event: EngineFsmEvent) -> Result<(), LifecycleError> {
        use EngineFsmEvent::*;
        use EngineFsmState::*;

        match (self.state, event) {
            (Idle, Start) => {
                self.state = Starting;
                Ok(())
            }
            (Starting, ResourceStarted(_)) => Ok(()),
            (Starting, ResourceFailed(_, err)) => {
                self.state = Error;
                Err(err)
            }
            (Running, Stop) | (Starting, Stop) => {
                self.state = Stopping;
                Ok(())
            }
            (Stopping, ResourceStopped(_)) => Ok(()),
            (Stopping, ResourceStopTimedOut(name, timeout_ms)) => {
                self.state = Error;
                Err(LifecycleError::StopTimeout(name, timeout_ms))
            }
            (Error, Start) => {
                self.state = Starting;
                Ok(())
            }
            _ => Err(LifecycleError::InvalidState(format!("{:?}", self.state))),
        }
    }

    /// Marks the start sequence complete; called by the driver once
    /// every required resource in [`ResourceGraph::start_order`] has
    /// reported [`EngineFsmEvent::ResourceStarted`] (§4.10).
    pub fn mark_running(&mut self) {
        if self.state == EngineFsmState::Starting {
            self.state = EngineFsmState::Running;
        }
    }

    /// Marks the stop sequence complete.
    pub fn mark_idle(&mut self) {
        if self.state == EngineFsmState::Stopping {
            self.state = EngineFsmState::Idle;
        }
    }
}

impl Default for EngineFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_linear_dependency_chain() {
        let mut graph = ResourceGraph::new();
        graph.register("clock", &[], ResourceKind::Required);
        graph.register("radio", &["clock"], ResourceKind::Required);
        graph.register("decode_pool", &["radio"], ResourceKind::Required);
        graph.register("operator_manager", &["decode_pool"], ResourceKind::Required);
        graph.register("mixer", &["operator_manager"], ResourceKind::Required);

        let order = graph.start_order().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("clock") < pos("radio"));
        assert!(pos("radio") < pos("decode_pool"));
        assert!(pos("decode_pool") < pos("operator_manager"));
        assert!(pos("operator_manager") < pos("mixer"));
    }

    #[test]
    fn stop_order_is_exact_reverse_of_start_order() {
        let mut graph = ResourceGraph::new();
        graph.register("a", &[], ResourceKind::Required);
        graph.register("b", &["a"], ResourceKind::Required);
        graph.register("c", &["b"], ResourceKind::Required);

        let start = graph.start_order().unwrap();
        let mut expected_stop = start.clone();
        expected_stop.reverse();
        assert_eq!(graph.stop_order().unwrap(), expected_stop);
    }

    #[test]
    fn circular_dependency_is_rejected() {
        let mut graph = ResourceGraph::new();
        graph.register("a", &["b"], ResourceKind::Required);
        graph.register("b", &["a"], ResourceKind::Required);
        assert!(matches!(
            graph.start_order(),
            Err(LifecycleError::CircularDependency(_))
        ));
    }

    #[test]
    fn start_stop_happy_path() {
        let mut fsm = EngineFsm::new();
        fsm.apply(EngineFsmEvent::Start).unwrap();
        assert_eq!(fsm.state(), EngineFsmState::Starting);
        fsm.apply(EngineFsmEvent::ResourceStarted("clock".to_string()))
            .unwrap();
        fsm.mark_running();
        assert_eq!(fsm.state(), EngineFsmState::Running);

        fsm.apply(EngineFsmEvent::Stop).unwrap();
        assert_eq!(fsm.state(), EngineFsmState::Stopping);
        fsm.apply(EngineFsmEvent::ResourceStopped("clock".to_string()))
            .unwrap();
        fsm.mark_idle();
        assert_eq!(fsm.state(), EngineFsmState::Idle);
    }

    #[test]
    fn resource_failure_during_start_moves_to_error() {
        let mut fsm = EngineFsm::new();
        fsm.apply(EngineFsmEvent::Start).unwrap();
        let err = fsm
            .apply(EngineFsmEvent::ResourceFailed(
                "radio".to_string(),
                LifecycleError::StartFailed("radio".to_string(), "timeout".to_string()),
            ))
            .unwrap_err();
        assert_eq!(fsm.state(), EngineFsmState::Error);
        assert!(matches!(err, LifecycleError::StartFailed(_, _)));
    }

    /// A resource that doesn't stop within its deadline moves the
    /// engine to `Error` rather than letting the stop sequence stall
    /// silently (§4.10/§5 "per-resource stop timeout, default 10s").
    #[test]
    fn resource_stop_timeout_moves_to_error() {
        let mut fsm = EngineFsm::new();
        fsm.apply(EngineFsmEvent::Start).unwrap();
        fsm.apply(EngineFsmEvent::ResourceStarted("radio".to_string()))
            .unwrap();
        fsm.mark_running();
        fsm.apply(EngineFsmEvent::Stop).unwrap();
        assert_eq!(fsm.state(), EngineFsmState::Stopping);

        let err = fsm
            .apply(EngineFsmEvent::ResourceStopTimedOut("radio".to_string(), 10_000))
            .unwrap_err();
        assert_eq!(fsm.state(), EngineFsmState::Error);
        assert!(matches!(err, LifecycleError::StopTimeout(name, ms) if name == "radio" && ms == 10_000));
    }
}
