//! The consensus kernel: pure computations over the instance store and a user-supplied
//! [CommandModule] that every phase of the protocol shares -- initial (seq, deps) for a new
//! proposal, merging responses, and the fast-path agreement check.

use std::collections::BTreeSet;

use eparl_pb::InstanceId;

use crate::command::CommandModule;
use crate::store::InstanceStore;

/// The initial `(seq, deps)` a proposer assigns a brand-new command: `seq` is one past the
/// highest seq among everything `command` interferes with (or `1` if nothing interferes), and
/// `deps` is the full set of interfering instance ids. `self_id` is excluded from the scan (it
/// cannot interfere with itself -- it isn't in the store yet when this is first called, but
/// callers that re-run it on a PreAccept recipient's local store pass it anyway, defensively).
pub fn initial_seq_and_deps<C: CommandModule>(
    module: &C,
    store: &InstanceStore,
    self_id: InstanceId,
    command: &C::Command,
) -> (u64, BTreeSet<InstanceId>) {
    let mut seq = 1u64;
    let mut deps = BTreeSet::new();
    for instance in store.snapshot() {
        if instance.id == self_id || instance.command.is_empty() {
            continue;
        }
        let Ok(other) = module.decode(&instance.command) else {
            continue;
        };
        if module.interferes(command, &other) {
            deps.insert(instance.id);
            seq = seq.max(instance.seq + 1);
        }
    }
    (seq, deps)
}

/// Element-wise max, as the spec requires for merging `seq` across responses.
pub fn merge_seq(a: u64, b: u64) -> u64 {
    a.max(b)
}

/// Set union, as the spec requires for merging `deps` across responses.
pub fn merge_deps(a: &BTreeSet<InstanceId>, b: &BTreeSet<InstanceId>) -> BTreeSet<InstanceId> {
    a.union(b).copied().collect()
}

/// True iff every response in `responses` reports the same `(seq, deps)` *as every other
/// response* -- never compared against the coordinator's own seeded value, which is itself just
/// one more vote and is included as one of the `responses` by the caller if the coordinator
/// counts its own loopback reply.
pub fn fast_path_agrees(responses: &[(u64, BTreeSet<InstanceId>)]) -> bool {
    match responses.split_first() {
        None => false,
        Some((first, rest)) => rest.iter().all(|r| r == first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eparl_pb::ReplicaId;

    struct Kv;
    impl CommandModule for Kv {
        type Command = (String, i64);
        type Result = ();
        type State = ();
        fn interferes(&self, a: &Self::Command, b: &Self::Command) -> bool {
            a.0 == b.0
        }
        fn execute(&self, _c: &Self::Command, _s: &mut Self::State) {}
        fn encode(&self, c: &Self::Command) -> Vec<u8> {
            format!("{}={}", c.0, c.1).into_bytes()
        }
        fn decode(&self, bytes: &[u8]) -> Result<Self::Command, crate::error::Error> {
            let s = String::from_utf8_lossy(bytes);
            let (k, v) = s.split_once('=').unwrap();
            Ok((k.to_string(), v.parse().unwrap()))
        }
        fn noop(&self) -> Self::Command {
            (String::new(), 0)
        }
    }

    #[test]
    fn no_interference_gives_seq_one_and_empty_deps() {
        let module = Kv;
        let store = InstanceStore::new();
        let id = InstanceId::new(ReplicaId::new(0), 1);
        let (seq, deps) = initial_seq_and_deps(&module, &store, id, &("x".to_string(), 1));
        assert_eq!(seq, 1);
        assert!(deps.is_empty());
    }

    #[test]
    fn interfering_instance_bumps_seq_and_adds_dep() {
        let module = Kv;
        let store = InstanceStore::new();
        let prior = InstanceId::new(ReplicaId::new(1), 4);
        store.commit(prior, module.encode(&("x".to_string(), 1)), 3, vec![]);
        let id = InstanceId::new(ReplicaId::new(0), 1);
        let (seq, deps) = initial_seq_and_deps(&module, &store, id, &("x".to_string(), 2));
        assert_eq!(seq, 4);
        assert!(deps.contains(&prior));
    }

    #[test]
    fn fast_path_requires_all_responses_to_agree() {
        let a = (1u64, BTreeSet::new());
        let b = (1u64, BTreeSet::new());
        assert!(fast_path_agrees(&[a.clone(), b.clone()]));
        let c = (2u64, BTreeSet::new());
        assert!(!fast_path_agrees(&[a, c]));
        assert!(!fast_path_agrees(&[]));
    }
}
