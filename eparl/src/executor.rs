//! The executor: turns committed instances into application state transitions, in an order that
//! is identical on every replica no matter which order `Commit`s arrived in.
//!
//! Vertices are committed-but-not-executed instances; edges point from an instance to each
//! not-yet-executed dependency. Strongly connected components (cycles of mutual interference) are
//! found with Tarjan's algorithm and processed deepest-first -- Tarjan's natural output order is
//! already the reverse topological order the spec asks for. Within an SCC, members execute in
//! `(seq, replica_id, instance_number)` order. A dependency absent from both the committed set and
//! the executed set stalls its whole SCC and asks the coordinator to recover it.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use biometrics::Counter;

use eparl_pb::{Instance, InstanceId};

use crate::command::CommandModule;
use crate::coordinator::DispatchEvent;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static INSTANCE_EXECUTED: Counter = Counter::new("eparl.executor.instance_executed");
static SCC_STALLED: Counter = Counter::new("eparl.executor.scc_stalled");

/// Register this module's biometrics with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&INSTANCE_EXECUTED);
    collector.register_counter(&SCC_STALLED);
}

static SCC_STALLED_MONITOR: tatl::Stationary =
    tatl::Stationary::new("eparl.executor.scc_stalled", &SCC_STALLED);

/// Register this module's `tatl` monitors: pages an operator's `HeyListen` whenever the executor
/// stalls waiting on a missing dependency.
pub fn register_monitors(hey_listen: &mut tatl::HeyListen) {
    hey_listen.register_stationary(&SCC_STALLED_MONITOR);
}

///////////////////////////////////////////////// Executor /////////////////////////////////////////

pub(crate) struct Executor<C: CommandModule> {
    module: Arc<C>,
    committed: HashMap<InstanceId, Instance>,
    executed: HashSet<InstanceId>,
    state: C::State,
}

impl<C: CommandModule> Executor<C> {
    pub fn new(module: Arc<C>, state: C::State) -> Self {
        Self {
            module,
            committed: HashMap::new(),
            executed: HashSet::new(),
            state,
        }
    }

    /// Record a newly-committed instance and drain as much of the dependency graph as is ready.
    pub fn notify_committed(&mut self, instance: Instance, out: &Sender<DispatchEvent<C>>) {
        if self.executed.contains(&instance.id) {
            return;
        }
        self.committed.insert(instance.id, instance);
        self.drain(out);
    }

    fn drain(&mut self, out: &Sender<DispatchEvent<C>>) {
        loop {
            if self.committed.is_empty() {
                return;
            }
            let mut vertices: Vec<InstanceId> = self.committed.keys().copied().collect();
            vertices.sort();

            let mut missing: HashSet<InstanceId> = HashSet::new();
            for id in &vertices {
                let instance = &self.committed[id];
                for dep in &instance.deps {
                    if !self.committed.contains_key(dep) && !self.executed.contains(dep) {
                        missing.insert(*dep);
                    }
                }
            }

            let sccs = tarjan_scc(&vertices, |id| {
                self.committed[id]
                    .deps
                    .iter()
                    .copied()
                    .filter(|d| self.committed.contains_key(d))
                    .collect::<Vec<_>>()
            });

            let mut requested: HashSet<InstanceId> = HashSet::new();
            let mut executed_any = false;
            'scc: for scc in &sccs {
                for id in scc {
                    let instance = &self.committed[id];
                    for dep in &instance.deps {
                        if missing.contains(dep) {
                            SCC_STALLED.click();
                            if requested.insert(*dep) {
                                let _ = out.send(DispatchEvent::RecoverNeeded(*dep));
                            }
                            continue 'scc;
                        }
                    }
                }

                let mut members = scc.clone();
                members.sort_by_key(|id| {
                    let instance = &self.committed[id];
                    (instance.seq, id.replica_id, id.instance_number)
                });
                for id in members {
                    let instance = self.committed.remove(&id).expect("member of its own scc");
                    let Ok(command) = self.module.decode(&instance.command) else {
                        // A committed instance with undecodable command bytes is a contract
                        // violation upstream (commit is only ever written with a decodable
                        // command); drop it from the graph rather than wedge the executor.
                        self.executed.insert(id);
                        continue;
                    };
                    let result = self.module.execute(&command, &mut self.state);
                    self.executed.insert(id);
                    INSTANCE_EXECUTED.click();
                    executed_any = true;
                    let _ = out.send(DispatchEvent::Executed(id, result));
                }
            }
            if !executed_any {
                return;
            }
        }
    }
}

///////////////////////////////////////////// tarjan_scc ////////////////////////////////////////////

/// Tarjan's strongly-connected-components algorithm. Vertices are visited in the order given by
/// `vertices` (the caller sorts by `(replica_id, instance_number)` for determinism), and the
/// returned SCCs are in the algorithm's natural output order, which is the reverse topological
/// order of the condensation graph: if there is an edge `u -> v` between distinct components, the
/// component containing `v` is returned before the one containing `u`.
fn tarjan_scc<F>(vertices: &[InstanceId], edges: F) -> Vec<Vec<InstanceId>>
where
    F: Fn(&InstanceId) -> Vec<InstanceId>,
{
    struct State {
        counter: usize,
        stack: Vec<InstanceId>,
        on_stack: HashSet<InstanceId>,
        index: HashMap<InstanceId, usize>,
        lowlink: HashMap<InstanceId, usize>,
        sccs: Vec<Vec<InstanceId>>,
    }

    fn strongconnect<F>(v: InstanceId, edges: &F, state: &mut State)
    where
        F: Fn(&InstanceId) -> Vec<InstanceId>,
    {
        state.index.insert(v, state.counter);
        state.lowlink.insert(v, state.counter);
        state.counter += 1;
        state.stack.push(v);
        state.on_stack.insert(v);

        for w in edges(&v) {
            if !state.index.contains_key(&w) {
                strongconnect(w, edges, state);
                let wl = state.lowlink[&w];
                let vl = state.lowlink[&v];
                state.lowlink.insert(v, vl.min(wl));
            } else if state.on_stack.contains(&w) {
                let wi = state.index[&w];
                let vl = state.lowlink[&v];
                state.lowlink.insert(v, vl.min(wi));
            }
        }

        if state.lowlink[&v] == state.index[&v] {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop().expect("v is on the stack");
                state.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            state.sccs.push(component);
        }
    }

    let mut state = State {
        counter: 0,
        stack: Vec::new(),
        on_stack: HashSet::new(),
        index: HashMap::new(),
        lowlink: HashMap::new(),
        sccs: Vec::new(),
    };
    for &v in vertices {
        if !state.index.contains_key(&v) {
            strongconnect(v, &edges, &mut state);
        }
    }
    state.sccs
}

#[cfg(test)]
mod tests {
    use super::*;
    use eparl_pb::ReplicaId;

    fn id(replica: u32, n: u64) -> InstanceId {
        InstanceId::new(ReplicaId::new(replica), n)
    }

    #[test]
    fn acyclic_graph_orders_deepest_dependency_first() {
        let a = id(0, 1);
        let b = id(0, 2);
        // a -> b (a depends on b); b has no deps.
        let mut edges_map: HashMap<InstanceId, Vec<InstanceId>> = HashMap::new();
        edges_map.insert(a, vec![b]);
        edges_map.insert(b, vec![]);
        let vertices = vec![a, b];
        let sccs = tarjan_scc(&vertices, |v| edges_map.get(v).cloned().unwrap_or_default());
        let order: Vec<InstanceId> = sccs.into_iter().flatten().collect();
        let pos_a = order.iter().position(|x| *x == a).unwrap();
        let pos_b = order.iter().position(|x| *x == b).unwrap();
        assert!(pos_b < pos_a, "dependency b must be ordered before a");
    }

    #[test]
    fn mutual_cycle_is_a_single_scc() {
        let a = id(0, 1);
        let b = id(1, 1);
        let mut edges_map: HashMap<InstanceId, Vec<InstanceId>> = HashMap::new();
        edges_map.insert(a, vec![b]);
        edges_map.insert(b, vec![a]);
        let vertices = vec![a, b];
        let sccs = tarjan_scc(&vertices, |v| edges_map.get(v).cloned().unwrap_or_default());
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 2);
    }
}
