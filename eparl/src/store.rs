//! The instance store: a flat hash table keyed by `(replica_id, instance_number)`, scoped to a
//! single replica process (see the distilled spec's data-model and design-notes sections). It
//! owns every ballot- and status-guarded write in the protocol, so the monotonicity invariants
//! ("no replica regresses status", "a committed instance's `(seq, deps, command)` never changes")
//! are enforced in exactly one place.
//!
//! Entries are never deleted -- log compaction is out of scope. A secondary index keyed by
//! whatever the interference predicate reads would speed up [InstanceStore::snapshot] scans on a
//! large store; the distilled spec calls that out as a valid optimization that isn't part of this
//! implementation, so the scan stays the simple linear one.

use std::collections::HashMap;
use std::sync::Mutex;

use biometrics::Counter;

use eparl_pb::{Ballot, Instance, InstanceId, Status};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static PRE_ACCEPT_REJECTED: Counter = Counter::new("eparl.store.pre_accept_rejected");
static ACCEPT_REJECTED: Counter = Counter::new("eparl.store.accept_rejected");
static COMMIT_WRITTEN: Counter = Counter::new("eparl.store.commit_written");
static BALLOT_BUMPED: Counter = Counter::new("eparl.store.ballot_bumped");
static BALLOT_REJECTED: Counter = Counter::new("eparl.store.ballot_rejected");

/// Register this module's biometrics with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&PRE_ACCEPT_REJECTED);
    collector.register_counter(&ACCEPT_REJECTED);
    collector.register_counter(&COMMIT_WRITTEN);
    collector.register_counter(&BALLOT_BUMPED);
    collector.register_counter(&BALLOT_REJECTED);
}

///////////////////////////////////////////// InstanceStore ////////////////////////////////////////

/// The per-replica map from [InstanceId] to [Instance].
#[derive(Default)]
pub struct InstanceStore {
    entries: Mutex<HashMap<InstanceId, Instance>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A point-in-time clone of every instance currently known, for interference scans. Cloned
    /// out from under the lock so the (possibly slow, user-supplied) interference predicate never
    /// runs while the store is held.
    pub fn snapshot(&self) -> Vec<Instance> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: InstanceId) -> Option<Instance> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    /// The ballot stored for `id`, or [Ballot::BOTTOM] if the instance is unknown.
    pub fn ballot(&self, id: InstanceId) -> Ballot {
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .map(|i| i.ballot)
            .unwrap_or(Ballot::BOTTOM)
    }

    /// Apply an incoming `Prepare{ballot}`: update the stored ballot if `ballot` is at least as
    /// high as the one on record, unconditionally (a higher ballot always wins, regardless of
    /// status). Returns the instance as now observed and whether the bump was accepted; a
    /// `PrepareOK` should only be sent back when it was.
    pub fn bump_ballot(&self, id: InstanceId, ballot: Ballot) -> (Instance, bool) {
        let mut entries = self.entries.lock().unwrap();
        let mut instance = entries.get(&id).cloned().unwrap_or(Instance {
            id,
            ..Instance::default()
        });
        let accepted = ballot >= instance.ballot;
        if accepted {
            instance.ballot = ballot;
            entries.insert(id, instance.clone());
            BALLOT_BUMPED.click();
        } else {
            BALLOT_REJECTED.click();
        }
        (instance, accepted)
    }

    /// Write a PreAccepted record (used for both an ordinary `PreAccept` and a recovery
    /// `TryPreAccept` that found no conflict). Rejects silently -- returns `None`, no wire reply
    /// -- if `ballot` is lower than the one on record, or if the instance has already moved past
    /// PreAccepted (Accepted, Committed, or Executed) -- a stale message arrived after the slot
    /// progressed on a higher ballot, and regressing its status here would un-teach the replica
    /// what it already knows.
    pub fn write_pre_accepted(
        &self,
        id: InstanceId,
        command: Vec<u8>,
        seq: u64,
        deps: Vec<InstanceId>,
        ballot: Ballot,
    ) -> Option<Instance> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&id) {
            if existing.status >= Status::Accepted || ballot < existing.ballot {
                PRE_ACCEPT_REJECTED.click();
                return None;
            }
        }
        let instance = Instance {
            id,
            command,
            seq,
            deps,
            status: Status::PreAccepted,
            ballot,
        };
        entries.insert(id, instance.clone());
        Some(instance)
    }

    /// Write an Accepted record. Same ballot/status guard as [InstanceStore::write_pre_accepted].
    /// `Accept` carries no command bytes on the wire, so a replica that never saw the matching
    /// `PreAccept` stores an empty command here -- it will learn the real one from `Commit` or a
    /// later recovery round.
    pub fn write_accepted(
        &self,
        id: InstanceId,
        seq: u64,
        deps: Vec<InstanceId>,
        ballot: Ballot,
    ) -> Option<Instance> {
        let mut entries = self.entries.lock().unwrap();
        let mut instance = entries.get(&id).cloned().unwrap_or(Instance {
            id,
            ..Instance::default()
        });
        if instance.status >= Status::Committed || ballot < instance.ballot {
            ACCEPT_REJECTED.click();
            return None;
        }
        instance.seq = seq;
        instance.deps = deps;
        instance.status = Status::Accepted;
        instance.ballot = ballot;
        entries.insert(id, instance.clone());
        Some(instance)
    }

    /// Write a Commit record. Commit is final and unconditional on ballot -- the coordinator
    /// holding a slow-quorum of Accepts (or fast-quorum of matching PreAccepts) is authoritative --
    /// so this always succeeds. If the instance is already committed, asserts that the new value
    /// matches the recorded one instead of overwriting it: two different committed values for the
    /// same instance is the "commit is monotone" contract violation, a bug, not a condition to
    /// recover from.
    pub fn commit(
        &self,
        id: InstanceId,
        command: Vec<u8>,
        seq: u64,
        deps: Vec<InstanceId>,
    ) -> Instance {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&id) {
            if existing.status >= Status::Committed {
                assert_eq!(
                    existing.seq, seq,
                    "commit-is-monotone violated: seq mismatch for {id}"
                );
                assert_eq!(
                    existing.deps, deps,
                    "commit-is-monotone violated: deps mismatch for {id}"
                );
                if !existing.command.is_empty() && !command.is_empty() {
                    assert_eq!(
                        existing.command, command,
                        "commit-is-monotone violated: command mismatch for {id}"
                    );
                }
                return existing.clone();
            }
        }
        let ballot = entries.get(&id).map(|i| i.ballot).unwrap_or(Ballot::BOTTOM);
        let command = if command.is_empty() {
            entries.get(&id).map(|i| i.command.clone()).unwrap_or_default()
        } else {
            command
        };
        let instance = Instance {
            id,
            command,
            seq,
            deps,
            status: Status::Committed,
            ballot,
        };
        COMMIT_WRITTEN.click();
        entries.insert(id, instance.clone());
        instance
    }

    /// Mark `id` Executed. No-op if the instance is unknown (shouldn't happen: the executor only
    /// ever executes instances it first saw committed).
    pub fn mark_executed(&self, id: InstanceId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(instance) = entries.get_mut(&id) {
            debug_assert!(instance.status >= Status::Committed);
            instance.status = Status::Executed;
        }
    }
}
