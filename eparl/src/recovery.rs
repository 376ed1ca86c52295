//! The recovery analyzer: classifies a quorum of `PrepareOK` responses into one of the decisions
//! the distilled spec's recovery table names, and separately drives the `TryPreAccept`
//! optimization's "possible quorum" bookkeeping. Pure classification logic -- the coordinator owns
//! sending messages and collecting responses; this module only decides what the collected
//! responses mean.

use std::collections::BTreeSet;

use eparl_pb::{InstanceId, PrepareOK, ReplicaId, Status, TryPreAcceptOK};

use crate::command::CommandModule;
use crate::quorum;
use crate::store::InstanceStore;

///////////////////////////////////////////// Decision //////////////////////////////////////////////

/// What the recovering replica should do once it has heard from a slow-quorum of `PrepareOK`s.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Some respondent already committed this instance; adopt it and broadcast Commit directly.
    Commit {
        command: Vec<u8>,
        seq: u64,
        deps: Vec<InstanceId>,
    },
    /// Run the Accept phase on this `(command, seq, deps)`.
    Accept {
        command: Vec<u8>,
        seq: u64,
        deps: Vec<InstanceId>,
    },
    /// Attempt the `TryPreAccept` optimization before falling back to a full Accept round.
    TryPreAccept {
        command: Vec<u8>,
        seq: u64,
        deps: Vec<InstanceId>,
    },
    /// Restart at PreAccept from scratch, seeded with the merged state seen so far.
    RestartPreAccept {
        command: Vec<u8>,
        seq: u64,
        deps: Vec<InstanceId>,
    },
    /// No quorum member had ever heard of this instance; seal the slot with a no-op.
    SealNoOp,
}

/// Classify a slow-quorum (or larger) set of `PrepareOK` responses per the distilled spec's
/// priority table. Returns `None` if `responses` is not yet a slow-quorum -- the caller should
/// keep waiting.
pub fn classify(
    responses: &[PrepareOK],
    cluster_size: u32,
    proposer: ReplicaId,
) -> Option<Decision> {
    let slow = quorum::slow_quorum(cluster_size);
    if (responses.len() as u32) < slow {
        return None;
    }

    if let Some(r) = responses.iter().find(|r| r.instance.status == Status::Committed) {
        return Some(Decision::Commit {
            command: r.instance.command.clone(),
            seq: r.instance.seq,
            deps: r.instance.deps.clone(),
        });
    }

    if let Some(r) = responses
        .iter()
        .filter(|r| r.instance.status == Status::Accepted)
        .max_by_key(|r| r.instance.ballot)
    {
        return Some(Decision::Accept {
            command: r.instance.command.clone(),
            seq: r.instance.seq,
            deps: r.instance.deps.clone(),
        });
    }

    let pre_accepted: Vec<&PrepareOK> = responses
        .iter()
        .filter(|r| r.instance.status == Status::PreAccepted)
        .collect();

    let fast = quorum::fast_quorum(cluster_size);
    if pre_accepted.len() as u32 >= fast {
        let first = &pre_accepted[0].instance;
        if pre_accepted
            .iter()
            .all(|r| r.instance.seq == first.seq && r.instance.deps == first.deps)
        {
            return Some(Decision::Accept {
                command: first.command.clone(),
                seq: first.seq,
                deps: first.deps.clone(),
            });
        }
    }

    let proposer_responded = responses.iter().any(|r| r.from == proposer);

    if !proposer_responded && pre_accepted.len() as u32 >= slow {
        let (seq, deps) = merge_pre_accepted(&pre_accepted);
        return Some(Decision::Accept {
            command: pre_accepted[0].instance.command.clone(),
            seq,
            deps,
        });
    }

    // ceil((slow_quorum + 1) / 2)
    let try_threshold = (slow + 2) / 2;
    if !proposer_responded && pre_accepted.len() as u32 >= try_threshold {
        let (seq, deps) = merge_pre_accepted(&pre_accepted);
        return Some(Decision::TryPreAccept {
            command: pre_accepted[0].instance.command.clone(),
            seq,
            deps,
        });
    }

    if !pre_accepted.is_empty() {
        let (seq, deps) = merge_pre_accepted(&pre_accepted);
        return Some(Decision::RestartPreAccept {
            command: pre_accepted[0].instance.command.clone(),
            seq,
            deps,
        });
    }

    Some(Decision::SealNoOp)
}

fn merge_pre_accepted(pre_accepted: &[&PrepareOK]) -> (u64, Vec<InstanceId>) {
    let mut seq = 0u64;
    let mut deps: BTreeSet<InstanceId> = BTreeSet::new();
    for r in pre_accepted {
        seq = seq.max(r.instance.seq);
        deps.extend(r.instance.deps.iter().copied());
    }
    (seq, deps.into_iter().collect())
}

////////////////////////////////////////// TryPreAccept conflict ////////////////////////////////////

/// Scan the local store for a conflict with a proposed `TryPreAccept`: an interfering instance not
/// already listed in `proposed_deps`, whose own `seq` is at least the proposed `seq`, and which
/// does not already carry `id` in its own deps (that direction of interference was already
/// resolved in `id`'s favor). Returns the conflicting replica/instance/status on the first match.
pub fn try_pre_accept_conflict<C: CommandModule>(
    module: &C,
    store: &InstanceStore,
    id: InstanceId,
    proposed_seq: u64,
    proposed_deps: &BTreeSet<InstanceId>,
    command: &C::Command,
) -> Option<(ReplicaId, InstanceId, Status)> {
    for instance in store.snapshot() {
        if instance.id == id || instance.command.is_empty() {
            continue;
        }
        if proposed_deps.contains(&instance.id) {
            continue;
        }
        if instance.deps.contains(&id) {
            continue;
        }
        let Ok(other) = module.decode(&instance.command) else {
            continue;
        };
        if !module.interferes(command, &other) {
            continue;
        }
        if instance.seq >= proposed_seq {
            return Some((instance.id.replica_id, instance.id, instance.status));
        }
    }
    None
}

////////////////////////////////////////// TryDecision //////////////////////////////////////////////

/// What to do once some `TryPreAcceptOK` responses are in, per the distilled spec's "possible
/// quorum" bookkeeping rules.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TryDecision {
    ProceedToAccept,
    RestartPhase1,
    Wait,
}

/// `responses` is every `TryPreAcceptOK` seen so far for this recovery attempt.
pub fn classify_try_pre_accept(responses: &[TryPreAcceptOK], cluster_size: u32) -> TryDecision {
    let slow = quorum::slow_quorum(cluster_size);
    let ok_count = responses.iter().filter(|r| r.ok).count() as u32;
    if ok_count >= slow {
        return TryDecision::ProceedToAccept;
    }
    if responses
        .iter()
        .any(|r| !r.ok && r.conflict_status == Status::Committed)
    {
        return TryDecision::RestartPhase1;
    }
    let conflicts = responses.iter().filter(|r| !r.ok).count() as u32;
    if conflicts > cluster_size / 2 {
        return TryDecision::RestartPhase1;
    }
    TryDecision::Wait
}

#[cfg(test)]
mod tests {
    use super::*;
    use eparl_pb::{Ballot, Instance};

    fn prepare_ok(from: u32, status: Status, seq: u64, deps: Vec<InstanceId>) -> PrepareOK {
        PrepareOK {
            instance_id: InstanceId::new(ReplicaId::new(0), 1),
            instance: Instance {
                id: InstanceId::new(ReplicaId::new(0), 1),
                command: b"cmd".to_vec(),
                seq,
                deps,
                status,
                ballot: Ballot::default(),
            },
            leader_responded: false,
            from: ReplicaId::new(from),
        }
    }

    #[test]
    fn committed_respondent_wins_over_everything_else() {
        let responses = vec![
            prepare_ok(0, Status::PreAccepted, 1, vec![]),
            prepare_ok(1, Status::Committed, 2, vec![]),
            prepare_ok(2, Status::Accepted, 3, vec![]),
        ];
        let decision = classify(&responses, 3, ReplicaId::new(0)).unwrap();
        assert_eq!(
            decision,
            Decision::Commit {
                command: b"cmd".to_vec(),
                seq: 2,
                deps: vec![],
            }
        );
    }

    #[test]
    fn not_enough_responses_yields_none() {
        let responses = vec![prepare_ok(0, Status::PreAccepted, 1, vec![])];
        assert!(classify(&responses, 5, ReplicaId::new(0)).is_none());
    }

    #[test]
    fn no_respondent_knows_anything_seals_no_op() {
        let responses = vec![
            prepare_ok(0, Status::None, 0, vec![]),
            prepare_ok(1, Status::None, 0, vec![]),
            prepare_ok(2, Status::None, 0, vec![]),
        ];
        let decision = classify(&responses, 3, ReplicaId::new(0)).unwrap();
        assert_eq!(decision, Decision::SealNoOp);
    }
}
