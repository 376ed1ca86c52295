//! The replica coordinator: a single dispatcher loop per replica that owns the instance store,
//! the table of live (not-yet-committed) instance state machines, and the channel the local
//! [crate::executor::Executor] reports back on. Everything here runs on one thread -- there is no
//! thread-per-instance, only per-instance *records* the dispatcher steps as events arrive (see the
//! distilled spec's concurrency section). The only other thread a replica runs is the
//! `sync42::background::BackgroundThread` this module spawns to own that loop.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use biometrics::{Counter, Sensor};
use indicio::{clue, DEBUG, INFO};

use eparl_pb::{
    Accept, AcceptOK, Ballot, Commit, Instance, InstanceId, PreAccept, PreAcceptOK, Prepare,
    PrepareOK, ReplicaId, ReplicaMessage, Status, SyncRequest, SyncResponse, TryPreAccept,
    TryPreAcceptOK,
};

use sync42::background::BackgroundThread;

use crate::command::CommandModule;
use crate::config::ClusterConfig;
use crate::error::Error;
use crate::executor::Executor;
use crate::kernel;
use crate::quorum;
use crate::recovery::{self, Decision, TryDecision};
use crate::store::InstanceStore;
use crate::transport::Transport;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PROPOSED: Counter = Counter::new("eparl.coordinator.proposed");
static FAST_PATH_COMMIT: Counter = Counter::new("eparl.coordinator.fast_path_commit");
static SLOW_PATH_COMMIT: Counter = Counter::new("eparl.coordinator.slow_path_commit");
static RECOVERY_STARTED: Counter = Counter::new("eparl.coordinator.recovery_started");
static RECOVERY_TRY_PRE_ACCEPT: Counter = Counter::new("eparl.coordinator.recovery_try_pre_accept");
static RECOVERY_SEALED_NOOP: Counter = Counter::new("eparl.coordinator.recovery_sealed_noop");
static NO_QUORUM: Counter = Counter::new("eparl.coordinator.no_quorum");

/// Register this module's biometrics with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&PROPOSED);
    collector.register_counter(&FAST_PATH_COMMIT);
    collector.register_counter(&SLOW_PATH_COMMIT);
    collector.register_counter(&RECOVERY_STARTED);
    collector.register_counter(&RECOVERY_TRY_PRE_ACCEPT);
    collector.register_counter(&RECOVERY_SEALED_NOOP);
    collector.register_counter(&NO_QUORUM);
}

static RECOVERY_STARTED_MONITOR: tatl::Stationary =
    tatl::Stationary::new("eparl.coordinator.recovery_started", &RECOVERY_STARTED);

/// Register this module's `tatl` monitors: an operator wiring up `HeyListen` gets paged whenever
/// recovery kicks in, so a cluster that never stops recovering is visible.
pub fn register_monitors(hey_listen: &mut tatl::HeyListen) {
    hey_listen.register_stationary(&RECOVERY_STARTED_MONITOR);
}

static COLLECTOR: indicio::Collector = indicio::Collector::new();

/// How many instances this process has committed via the single-round-trip fast path, since
/// start. Exposed alongside [slow_path_commit_count] so operators and tests can tell the two
/// paths apart instead of only observing that *some* path eventually converges.
pub fn fast_path_commit_count() -> u64 {
    FAST_PATH_COMMIT.read()
}

/// How many instances this process has committed via the two-round-trip Accept path, since
/// start.
pub fn slow_path_commit_count() -> u64 {
    SLOW_PATH_COMMIT.read()
}

/////////////////////////////////////////////// Pending ////////////////////////////////////////////

/// A single-cell rendezvous point between a blocked `propose` caller and the dispatcher loop that
/// eventually learns the outcome. Adapted from, not reused verbatim from,
/// `sync42::wait_list::Waiter`: that primitive batches many waiters through one list position,
/// while a proposal needs exactly one cell per [InstanceId].
pub(crate) struct Pending<R> {
    result: Mutex<Option<Result<R, Error>>>,
    condvar: Condvar,
}

impl<R> Pending<R> {
    pub(crate) fn new() -> Self {
        Self {
            result: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Deliver the outcome. Idempotent: the first caller wins, later calls are no-ops.
    pub(crate) fn fulfill(&self, result: Result<R, Error>) {
        let mut guard = self.result.lock().unwrap();
        if guard.is_none() {
            *guard = Some(result);
            self.condvar.notify_all();
        }
    }

    /// Block up to `timeout` for a result. `None` means the timeout elapsed unfulfilled; the
    /// caller decides what error that becomes.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<Result<R, Error>> {
        let guard = self.result.lock().unwrap();
        let (mut guard, _timed_out) = self
            .condvar
            .wait_timeout_while(guard, timeout, |r| r.is_none())
            .unwrap();
        guard.take()
    }
}

///////////////////////////////////////////// DispatchEvent ////////////////////////////////////////

/// Every event the dispatcher loop reacts to, funneled through one channel so a single thread can
/// own all per-replica state without locking it against other tasks.
pub(crate) enum DispatchEvent<C: CommandModule> {
    /// A wire message arrived from `ReplicaId`, delivered by the bridging thread that reads the
    /// transport's inbound [Receiver].
    Inbound(ReplicaId, ReplicaMessage),
    /// A local caller wants `command` proposed; fulfill `Arc<Pending>` with the outcome.
    Propose(C::Command, Arc<Pending<C::Result>>),
    /// A timer tick: check every in-flight proposal/recovery's deadline.
    Tick,
    /// The executor finished running `id`, producing `result`.
    Executed(InstanceId, C::Result),
    /// The executor stalled on a dependency it has never heard of; recover it.
    RecoverNeeded(InstanceId),
}

////////////////////////////////////////////// phases //////////////////////////////////////////////

enum ProposalPhase {
    PreAccepting,
    Accepting,
}

struct ProposalState<C: CommandModule> {
    command: C::Command,
    seq: u64,
    deps: BTreeSet<InstanceId>,
    ballot: Ballot,
    phase: ProposalPhase,
    pre_accept_oks: HashMap<ReplicaId, (u64, BTreeSet<InstanceId>)>,
    accept_oks: HashSet<ReplicaId>,
    deadline: Instant,
}

enum RecoveryPhase {
    Preparing,
    TryPreAccepting,
}

struct RecoveryState<C: CommandModule> {
    ballot: Ballot,
    phase: RecoveryPhase,
    prepare_oks: HashMap<ReplicaId, PrepareOK>,
    try_pre_accept_oks: HashMap<ReplicaId, TryPreAcceptOK>,
    try_command: C::Command,
    try_seq: u64,
    try_deps: Vec<InstanceId>,
    deadline: Instant,
}

//////////////////////////////////////////// ReplicaInfo ///////////////////////////////////////////

/// A snapshot of a replica's identity and reachability, returned by [ReplicaHandle::info].
#[derive(Clone, Debug)]
pub struct ReplicaInfo {
    pub replica_id: ReplicaId,
    pub cluster_size: u32,
    pub live_replicas: u32,
}

///////////////////////////////////////////// Coordinator ///////////////////////////////////////////

struct Coordinator<C: CommandModule> {
    config: ClusterConfig,
    module: Arc<C>,
    store: InstanceStore,
    executor: Executor<C>,
    transport: Arc<dyn Transport>,
    next_instance_number: AtomicU64,
    proposals: HashMap<InstanceId, ProposalState<C>>,
    recoveries: HashMap<InstanceId, RecoveryState<C>>,
    pending: HashMap<InstanceId, Arc<Pending<C::Result>>>,
    /// Instances this replica has PreAccepted or Accepted on someone else's behalf, with the
    /// deadline by which it expects to observe a `Commit`. A non-proposer replica is the only one
    /// that can suspect a crashed coordinator for an instance it didn't originate itself -- the
    /// distilled spec's recovery trigger is "the Executor has been waiting too long" *or* "a
    /// coordinator is suspected failed"; this table is what realizes the second case. Cleared on
    /// `Commit` and on starting recovery (recovery carries its own deadline from then on).
    watching: HashMap<InstanceId, Instant>,
    event_tx: Sender<DispatchEvent<C>>,
}

impl<C: CommandModule> Coordinator<C> {
    fn cluster_size(&self) -> u32 {
        self.config.cluster_size()
    }

    fn self_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    fn allocate_instance_id(&self) -> InstanceId {
        let n = self.next_instance_number.fetch_add(1, Ordering::Relaxed);
        InstanceId::new(self.self_id(), n)
    }

    fn run(mut self, events: Receiver<DispatchEvent<C>>, done: Arc<std::sync::atomic::AtomicBool>) {
        let sync_deadline = Instant::now() + self.config.sync_delay;
        let mut synced = false;
        while !done.load(Ordering::Relaxed) {
            if !synced && Instant::now() >= sync_deadline {
                self.transport
                    .broadcast(ReplicaMessage::SyncRequest(SyncRequest { from: self.self_id() }));
                synced = true;
            }
            let wait = if synced {
                Duration::from_millis(100)
            } else {
                sync_deadline.saturating_duration_since(Instant::now())
            };
            let event = match events.recv_timeout(wait) {
                Ok(event) => event,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            };
            self.handle(event);
        }
    }

    fn handle(&mut self, event: DispatchEvent<C>) {
        match event {
            DispatchEvent::Inbound(from, message) => self.handle_inbound(from, message),
            DispatchEvent::Propose(command, pending) => self.handle_propose(command, pending),
            DispatchEvent::Tick => self.handle_tick(),
            DispatchEvent::Executed(id, result) => self.handle_executed(id, result),
            DispatchEvent::RecoverNeeded(id) => self.start_recovery(id),
        }
    }

    //////////////////////////////////////////// propose ///////////////////////////////////////////

    fn handle_propose(&mut self, command: C::Command, pending: Arc<Pending<C::Result>>) {
        let live = self.transport.live_peers().len() as u32;
        let needed = quorum::slow_quorum(self.cluster_size());
        if live < needed {
            NO_QUORUM.click();
            pending.fulfill(Err(Error::no_quorum(self.cluster_size(), live, needed)));
            return;
        }
        let id = self.allocate_instance_id();
        self.pending.insert(id, pending);
        PROPOSED.click();
        let (seq, deps) = kernel::initial_seq_and_deps(self.module.as_ref(), &self.store, id, &command);
        let ballot = Ballot::initial(self.self_id());
        self.begin_pre_accept(id, command, seq, deps, ballot);
    }

    fn begin_pre_accept(
        &mut self,
        id: InstanceId,
        command: C::Command,
        seq: u64,
        deps: BTreeSet<InstanceId>,
        ballot: Ballot,
    ) {
        clue!(COLLECTOR, INFO, {
            instance: format!("{id}"),
            phase: "pre_accept_sent",
        });
        self.proposals.insert(
            id,
            ProposalState {
                command: command.clone(),
                seq,
                deps: deps.clone(),
                ballot,
                phase: ProposalPhase::PreAccepting,
                pre_accept_oks: HashMap::new(),
                accept_oks: HashSet::new(),
                deadline: Instant::now() + self.config.phase_timeout,
            },
        );
        self.transport.broadcast(ReplicaMessage::PreAccept(PreAccept {
            instance_id: id,
            command: self.module.encode(&command),
            seq,
            deps: deps.into_iter().collect(),
            ballot,
        }));
    }

    fn begin_accept(&mut self, id: InstanceId, command: C::Command, seq: u64, deps: BTreeSet<InstanceId>, ballot: Ballot) {
        clue!(COLLECTOR, INFO, {
            instance: format!("{id}"),
            phase: "accept_sent",
        });
        self.proposals.insert(
            id,
            ProposalState {
                command: command.clone(),
                seq,
                deps: deps.clone(),
                ballot,
                phase: ProposalPhase::Accepting,
                pre_accept_oks: HashMap::new(),
                accept_oks: HashSet::new(),
                deadline: Instant::now() + self.config.phase_timeout,
            },
        );
        self.transport.broadcast(ReplicaMessage::Accept(Accept {
            instance_id: id,
            seq,
            deps: deps.into_iter().collect(),
            ballot,
        }));
    }

    fn finish_commit(&mut self, id: InstanceId, command: Vec<u8>, seq: u64, deps: Vec<InstanceId>) {
        let instance = self.store.commit(id, command.clone(), seq, deps.clone());
        self.proposals.remove(&id);
        self.recoveries.remove(&id);
        self.watching.remove(&id);
        self.transport.broadcast(ReplicaMessage::Commit(Commit {
            instance_id: id,
            command,
            seq,
            deps,
        }));
        self.executor.notify_committed(instance, &self.event_tx);
    }

    //////////////////////////////////////////// inbound ///////////////////////////////////////////

    fn handle_inbound(&mut self, from: ReplicaId, message: ReplicaMessage) {
        match message {
            ReplicaMessage::PreAccept(m) => self.on_pre_accept(from, m),
            ReplicaMessage::PreAcceptOK(m) => self.on_pre_accept_ok(m),
            ReplicaMessage::Accept(m) => self.on_accept(from, m),
            ReplicaMessage::AcceptOK(m) => self.on_accept_ok(m),
            ReplicaMessage::Commit(m) => self.on_commit(m),
            ReplicaMessage::Prepare(m) => self.on_prepare(from, m),
            ReplicaMessage::PrepareOK(m) => self.on_prepare_ok(m),
            ReplicaMessage::TryPreAccept(m) => self.on_try_pre_accept(from, m),
            ReplicaMessage::TryPreAcceptOK(m) => self.on_try_pre_accept_ok(m),
            ReplicaMessage::SyncRequest(m) => self.on_sync_request(m),
            ReplicaMessage::SyncResponse(m) => self.on_sync_response(m),
        }
    }

    fn on_pre_accept(&mut self, from: ReplicaId, m: PreAccept) {
        if m.ballot < self.store.ballot(m.instance_id) {
            return;
        }
        let Ok(command) = self.module.decode(&m.command) else {
            return;
        };
        let (local_seq, local_deps) =
            kernel::initial_seq_and_deps(self.module.as_ref(), &self.store, m.instance_id, &command);
        let incoming_deps: BTreeSet<InstanceId> = m.deps.iter().copied().collect();
        let seq = kernel::merge_seq(m.seq, local_seq);
        let deps = kernel::merge_deps(&incoming_deps, &local_deps);
        let Some(instance) =
            self.store
                .write_pre_accepted(m.instance_id, m.command, seq, deps.into_iter().collect(), m.ballot)
        else {
            return;
        };
        self.touch_watch(m.instance_id);
        self.transport.send(
            from,
            ReplicaMessage::PreAcceptOK(PreAcceptOK {
                instance_id: m.instance_id,
                seq: instance.seq,
                deps: instance.deps,
                from: self.self_id(),
            }),
        );
    }

    /// Refresh (or start) the "expect a `Commit` for this instance soon" deadline, unless this
    /// replica is the one driving it (it already tracks its own deadline in `proposals` or
    /// `recoveries`).
    fn touch_watch(&mut self, id: InstanceId) {
        if self.proposals.contains_key(&id) || self.recoveries.contains_key(&id) {
            return;
        }
        self.watching
            .insert(id, Instant::now() + self.config.phase_timeout * 2);
    }

    /// `has_slow(count)` becomes true strictly before `has_fast(count)` for every cluster size
    /// N>=3 (`fast_quorum(N) > slow_quorum(N)`, see `quorum`'s own worked table), since responses
    /// arrive one at a time through the dispatcher. So this must never fall back to the slow path
    /// merely because a slow quorum has accumulated -- that would foreclose the fast path on
    /// every proposal before it ever had a chance to collect a full fast quorum. The slow-path
    /// fallback for a proposal that never reaches fast-quorum agreement lives in `handle_tick`,
    /// once the phase timeout has actually ruled out further responses; this handler only ever
    /// commits the fast path early, or gives up on it the moment a full fast quorum of responses
    /// is in hand and they disagree (no later response can undo that disagreement).
    fn on_pre_accept_ok(&mut self, m: PreAcceptOK) {
        let cluster_size = self.cluster_size();
        let Some(proposal) = self.proposals.get_mut(&m.instance_id) else {
            return;
        };
        if !matches!(proposal.phase, ProposalPhase::PreAccepting) {
            return;
        }
        let deps: BTreeSet<InstanceId> = m.deps.into_iter().collect();
        proposal.pre_accept_oks.insert(m.from, (m.seq, deps));

        let count = proposal.pre_accept_oks.len() as u32;
        if !quorum::has_fast(count, cluster_size) {
            return;
        }
        let responses: Vec<(u64, BTreeSet<InstanceId>)> =
            proposal.pre_accept_oks.values().cloned().collect();
        let id = m.instance_id;
        if kernel::fast_path_agrees(&responses) {
            let (seq, deps) = responses.into_iter().next().unwrap();
            let command = self.module.encode(&proposal.command);
            FAST_PATH_COMMIT.click();
            self.finish_commit(id, command, seq, deps.into_iter().collect());
            return;
        }
        // A full fast quorum has responded and disagrees: the fast path is dead for this
        // instance (no later response can make a quorum that already disagreed agree), so merge
        // what's known and move to the slow path now instead of waiting out the rest of the
        // phase timeout.
        let mut seq = proposal.seq;
        let mut deps = proposal.deps.clone();
        for (s, d) in &responses {
            seq = kernel::merge_seq(seq, *s);
            deps = kernel::merge_deps(&deps, d);
        }
        let command = proposal.command.clone();
        let ballot = proposal.ballot;
        SLOW_PATH_COMMIT.click();
        self.begin_accept(id, command, seq, deps, ballot);
    }

    fn on_accept(&mut self, from: ReplicaId, m: Accept) {
        if m.ballot < self.store.ballot(m.instance_id) {
            return;
        }
        let Some(_instance) =
            self.store
                .write_accepted(m.instance_id, m.seq, m.deps, m.ballot)
        else {
            return;
        };
        self.touch_watch(m.instance_id);
        self.transport.send(
            from,
            ReplicaMessage::AcceptOK(AcceptOK {
                instance_id: m.instance_id,
                from: self.self_id(),
            }),
        );
    }

    fn on_accept_ok(&mut self, m: AcceptOK) {
        let cluster_size = self.cluster_size();
        let Some(proposal) = self.proposals.get_mut(&m.instance_id) else {
            return;
        };
        if !matches!(proposal.phase, ProposalPhase::Accepting) {
            return;
        }
        proposal.accept_oks.insert(m.from);
        if quorum::has_slow(proposal.accept_oks.len() as u32, cluster_size) {
            let id = m.instance_id;
            let command = self.module.encode(&proposal.command);
            let seq = proposal.seq;
            let deps: Vec<InstanceId> = proposal.deps.iter().copied().collect();
            self.finish_commit(id, command, seq, deps);
        }
    }

    fn on_commit(&mut self, m: Commit) {
        let instance = self.store.commit(m.instance_id, m.command, m.seq, m.deps);
        self.proposals.remove(&m.instance_id);
        self.recoveries.remove(&m.instance_id);
        self.watching.remove(&m.instance_id);
        clue!(COLLECTOR, DEBUG, {
            instance: format!("{}", m.instance_id),
            phase: "commit_observed",
        });
        self.executor.notify_committed(instance, &self.event_tx);
    }

    fn on_prepare(&mut self, from: ReplicaId, m: Prepare) {
        let (instance, accepted) = self.store.bump_ballot(m.instance_id, m.ballot);
        if !accepted {
            return;
        }
        let leader_responded = self.self_id() == m.instance_id.replica_id;
        self.transport.send(
            from,
            ReplicaMessage::PrepareOK(PrepareOK {
                instance_id: m.instance_id,
                instance,
                leader_responded,
                from: self.self_id(),
            }),
        );
    }

    fn on_prepare_ok(&mut self, m: PrepareOK) {
        let cluster_size = self.cluster_size();
        let id = m.instance_id;
        let Some(recovery) = self.recoveries.get_mut(&id) else {
            return;
        };
        if !matches!(recovery.phase, RecoveryPhase::Preparing) {
            return;
        }
        recovery.prepare_oks.insert(m.from, m.clone());
        let responses: Vec<PrepareOK> = recovery.prepare_oks.values().cloned().collect();
        let Some(decision) = recovery::classify(&responses, cluster_size, id.replica_id) else {
            return;
        };
        self.apply_recovery_decision(id, decision);
    }

    fn apply_recovery_decision(&mut self, id: InstanceId, decision: Decision) {
        let ballot = self.recoveries.get(&id).map(|r| r.ballot).unwrap_or(Ballot::BOTTOM);
        match decision {
            Decision::Commit { command, seq, deps } => {
                self.recoveries.remove(&id);
                self.finish_commit(id, command, seq, deps);
            }
            Decision::Accept { command, seq, deps } => {
                self.recoveries.remove(&id);
                let Ok(command) = self.module.decode(&command) else {
                    return;
                };
                self.begin_accept(id, command, seq, deps.into_iter().collect(), ballot);
            }
            Decision::RestartPreAccept { command, seq, deps } => {
                self.recoveries.remove(&id);
                let Ok(command) = self.module.decode(&command) else {
                    return;
                };
                self.begin_pre_accept(id, command, seq, deps.into_iter().collect(), ballot);
            }
            Decision::TryPreAccept { command, seq, deps } => {
                let Ok(decoded) = self.module.decode(&command) else {
                    return;
                };
                RECOVERY_TRY_PRE_ACCEPT.click();
                let recipients: Vec<ReplicaId> = {
                    let recovery = self.recoveries.get(&id).expect("decision came from this recovery");
                    self.transport
                        .peers()
                        .into_iter()
                        .filter(|p| {
                            !recovery
                                .prepare_oks
                                .get(p)
                                .map(|r| r.instance.status == Status::PreAccepted)
                                .unwrap_or(false)
                        })
                        .collect()
                };
                if let Some(recovery) = self.recoveries.get_mut(&id) {
                    recovery.phase = RecoveryPhase::TryPreAccepting;
                    recovery.try_command = decoded.clone();
                    recovery.try_seq = seq;
                    recovery.try_deps = deps.clone();
                    recovery.try_pre_accept_oks.clear();
                    recovery.deadline = Instant::now() + self.config.recovery_timeout;
                }
                let wire = TryPreAccept {
                    instance_id: id,
                    command: self.module.encode(&decoded),
                    seq,
                    deps,
                    ballot,
                };
                for peer in recipients {
                    self.transport.send(peer, ReplicaMessage::TryPreAccept(wire.clone()));
                }
            }
            Decision::SealNoOp => {
                self.recoveries.remove(&id);
                RECOVERY_SEALED_NOOP.click();
                let noop = self.module.noop();
                self.begin_pre_accept(id, noop, 1, BTreeSet::new(), ballot);
            }
        }
    }

    fn on_try_pre_accept(&mut self, from: ReplicaId, m: TryPreAccept) {
        if m.ballot < self.store.ballot(m.instance_id) {
            return;
        }
        let Ok(command) = self.module.decode(&m.command) else {
            return;
        };
        let deps: BTreeSet<InstanceId> = m.deps.iter().copied().collect();
        let conflict = recovery::try_pre_accept_conflict(
            self.module.as_ref(),
            &self.store,
            m.instance_id,
            m.seq,
            &deps,
            &command,
        );
        let reply = match conflict {
            Some((conflict_replica, conflict_instance, conflict_status)) => TryPreAcceptOK {
                instance_id: m.instance_id,
                ok: false,
                from: self.self_id(),
                conflict_replica,
                conflict_instance,
                conflict_status,
            },
            None => {
                let ok = self
                    .store
                    .write_pre_accepted(m.instance_id, m.command, m.seq, m.deps, m.ballot)
                    .is_some();
                TryPreAcceptOK {
                    instance_id: m.instance_id,
                    ok,
                    from: self.self_id(),
                    conflict_replica: ReplicaId::default(),
                    conflict_instance: InstanceId::default(),
                    conflict_status: Status::default(),
                }
            }
        };
        self.transport.send(from, ReplicaMessage::TryPreAcceptOK(reply));
    }

    fn on_try_pre_accept_ok(&mut self, m: TryPreAcceptOK) {
        let cluster_size = self.cluster_size();
        let id = m.instance_id;
        let Some(recovery) = self.recoveries.get_mut(&id) else {
            return;
        };
        if !matches!(recovery.phase, RecoveryPhase::TryPreAccepting) {
            return;
        }
        recovery.try_pre_accept_oks.insert(m.from, m.clone());
        let responses: Vec<TryPreAcceptOK> = recovery.try_pre_accept_oks.values().cloned().collect();
        match recovery::classify_try_pre_accept(&responses, cluster_size) {
            TryDecision::Wait => {}
            TryDecision::ProceedToAccept => {
                let command = recovery.try_command.clone();
                let seq = recovery.try_seq;
                let deps: BTreeSet<InstanceId> = recovery.try_deps.iter().copied().collect();
                let ballot = recovery.ballot;
                self.recoveries.remove(&id);
                self.begin_accept(id, command, seq, deps, ballot);
            }
            TryDecision::RestartPhase1 => {
                let command = recovery.try_command.clone();
                let seq = recovery.try_seq;
                let deps: BTreeSet<InstanceId> = recovery.try_deps.iter().copied().collect();
                let ballot = recovery.ballot;
                self.recoveries.remove(&id);
                self.begin_pre_accept(id, command, seq, deps, ballot);
            }
        }
    }

    fn on_sync_request(&mut self, m: SyncRequest) {
        let instances: Vec<Instance> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|i| i.status >= Status::Committed)
            .collect();
        self.transport.send(
            m.from,
            ReplicaMessage::SyncResponse(SyncResponse {
                from: self.self_id(),
                instances,
            }),
        );
    }

    fn on_sync_response(&mut self, m: SyncResponse) {
        for instance in m.instances {
            let known_status = self.store.get(instance.id).map(|i| i.status);
            if known_status.map(|s| s < Status::Committed).unwrap_or(true) {
                let committed =
                    self.store
                        .commit(instance.id, instance.command, instance.seq, instance.deps);
                self.executor.notify_committed(committed, &self.event_tx);
            }
        }
    }

    //////////////////////////////////////////// executor //////////////////////////////////////////

    fn handle_executed(&mut self, id: InstanceId, result: C::Result) {
        self.store.mark_executed(id);
        if let Some(pending) = self.pending.remove(&id) {
            pending.fulfill(Ok(result));
        }
    }

    fn start_recovery(&mut self, id: InstanceId) {
        self.watching.remove(&id);
        if self.recoveries.contains_key(&id) {
            return;
        }
        RECOVERY_STARTED.click();
        clue!(COLLECTOR, INFO, {
            instance: format!("{id}"),
            phase: "recovery_started",
        });
        let ballot = Ballot::higher_than(self.store.ballot(id), self.self_id());
        self.recoveries.insert(
            id,
            RecoveryState {
                ballot,
                phase: RecoveryPhase::Preparing,
                prepare_oks: HashMap::new(),
                try_pre_accept_oks: HashMap::new(),
                try_command: self.module.noop(),
                try_seq: 0,
                try_deps: Vec::new(),
                deadline: Instant::now() + self.config.recovery_timeout,
            },
        );
        self.transport.broadcast(ReplicaMessage::Prepare(Prepare {
            instance_id: id,
            ballot,
            from: self.self_id(),
        }));
    }

    //////////////////////////////////////////// timers ////////////////////////////////////////////

    fn handle_tick(&mut self) {
        let now = Instant::now();
        let cluster_size = self.cluster_size();
        let timed_out: Vec<InstanceId> = self
            .proposals
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in timed_out {
            // A PreAccepting proposal whose phase timeout expired without ever reaching
            // fast-quorum agreement still makes progress on the slow path if a slow quorum of
            // PreAcceptOKs came in -- that's the ordinary (not crash-triggered) ePaxos slow path,
            // not a reason to suspect the coordinator and start recovery. Only a proposal that
            // couldn't even muster a slow quorum, or one already on the slow path whose Accept
            // round itself timed out, falls through to recovery.
            let fall_back_to_slow = matches!(
                self.proposals.get(&id),
                Some(p) if matches!(p.phase, ProposalPhase::PreAccepting)
                    && quorum::has_slow(p.pre_accept_oks.len() as u32, cluster_size)
            );
            if fall_back_to_slow {
                let p = self.proposals.remove(&id).expect("checked above");
                let mut seq = p.seq;
                let mut deps = p.deps.clone();
                for (s, d) in p.pre_accept_oks.values() {
                    seq = kernel::merge_seq(seq, *s);
                    deps = kernel::merge_deps(&deps, d);
                }
                SLOW_PATH_COMMIT.click();
                self.begin_accept(id, p.command, seq, deps, p.ballot);
            } else {
                self.proposals.remove(&id);
                self.start_recovery(id);
            }
        }

        // A non-proposer replica suspects the coordinator has crashed if it PreAccepted or
        // Accepted an instance and hasn't seen a Commit for it within the watch deadline -- the
        // distilled spec's "a coordinator is suspected failed" recovery trigger (§4.5), distinct
        // from the Executor's missing-dependency trigger.
        let suspected: Vec<InstanceId> = self
            .watching
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in suspected {
            self.watching.remove(&id);
            self.start_recovery(id);
        }

        let expired: Vec<InstanceId> = self
            .recoveries
            .iter()
            .filter(|(_, r)| now >= r.deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.recoveries.remove(&id);
            if let Some(pending) = self.pending.remove(&id) {
                pending.fulfill(Err(Error::recovery_timeout(id)));
            }
        }
    }
}

///////////////////////////////////////////// ReplicaHandle ////////////////////////////////////////

/// The library's single entry point handle: a running replica. Dropping it stops the dispatcher
/// thread (see [sync42::background::BackgroundThread]).
pub struct ReplicaHandle<C: CommandModule> {
    config: ClusterConfig,
    event_tx: Sender<DispatchEvent<C>>,
    /// Shared with the [Coordinator] running on `_background`'s thread, so [ReplicaHandle::info]
    /// can report live [Transport::live_peers] without round-tripping through the dispatcher.
    transport: Arc<dyn Transport>,
    _background: BackgroundThread,
}

impl<C: CommandModule> ReplicaHandle<C> {
    /// Propose `command`. Blocks the calling thread until the command commits and executes
    /// everywhere-consistent order, or until `config.propose_timeout` elapses.
    pub fn propose(&self, command: C::Command) -> Result<C::Result, Error> {
        let pending = Arc::new(Pending::new());
        if self
            .event_tx
            .send(DispatchEvent::Propose(command, Arc::clone(&pending)))
            .is_err()
        {
            return Err(Error::no_quorum(self.config.cluster_size(), 0, quorum::slow_quorum(self.config.cluster_size())));
        }
        match pending.wait(self.config.propose_timeout) {
            Some(result) => result,
            None => Err(Error::recovery_timeout(InstanceId::default())),
        }
    }

    pub fn info(&self) -> ReplicaInfo {
        ReplicaInfo {
            replica_id: self.config.replica_id,
            cluster_size: self.config.cluster_size(),
            live_replicas: self.transport.live_peers().len() as u32,
        }
    }

    pub fn replicas(&self) -> Vec<ReplicaId> {
        self.config.peers.clone()
    }
}

/// Start a replica: spawns the dispatcher's [BackgroundThread], wires `inbound` (this replica's
/// half of the [Transport]) into the event loop, and returns the handle callers propose through.
pub fn start<C: CommandModule>(
    config: ClusterConfig,
    module: C,
    transport: impl Transport + 'static,
    inbound: Receiver<crate::transport::channel::Envelope>,
    initial_state: C::State,
) -> ReplicaHandle<C> {
    let (event_tx, event_rx) = mpsc::channel::<DispatchEvent<C>>();
    let bridge_tx = event_tx.clone();
    std::thread::spawn(move || {
        while let Ok(envelope) = inbound.recv() {
            if bridge_tx
                .send(DispatchEvent::Inbound(envelope.from, envelope.message))
                .is_err()
            {
                break;
            }
        }
    });

    let timer_tx = event_tx.clone();
    let phase_timeout = config.phase_timeout;
    std::thread::spawn(move || loop {
        std::thread::sleep(phase_timeout);
        if timer_tx.send(DispatchEvent::Tick).is_err() {
            break;
        }
    });

    let module = Arc::new(module);
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let coordinator = Coordinator {
        config: config.clone(),
        module: Arc::clone(&module),
        store: InstanceStore::new(),
        executor: Executor::new(module, initial_state),
        transport: Arc::clone(&transport),
        next_instance_number: AtomicU64::new(0),
        proposals: HashMap::new(),
        recoveries: HashMap::new(),
        pending: HashMap::new(),
        watching: HashMap::new(),
        event_tx: event_tx.clone(),
    };

    let background = BackgroundThread::spawn(move |done| {
        coordinator.run(event_rx, done);
    });

    ReplicaHandle {
        config,
        event_tx,
        transport,
        _background: background,
    }
}
