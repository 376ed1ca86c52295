//! A deterministic in-process test harness: stands up an N-replica cluster over
//! [eparl::transport::channel], all within one process, so tests can propose commands at any
//! replica and observe the whole cluster converge without a real network.
//!
//! Unlike the teacher's `sim` crate -- a single-threaded, simulated-clock event loop -- `eparl`'s
//! coordinator runs its dispatcher on a real [sync42::background::BackgroundThread] and blocks
//! real callers on real condition variables, so this harness schedules on real wall-clock threads
//! too, just with the short timeouts [short_config] sets. There is no virtual clock to advance;
//! tests observe convergence by blocking on [eparl::ReplicaHandle::propose] itself.

use std::collections::HashMap;
use std::time::Duration;

use eparl::transport::channel::ChannelNetwork;
use eparl::{start, ClusterConfig, Error, ReplicaHandle};
use eparl_pb::ReplicaId;

use crate::kv::{Kv, KvCommand, KvResult, KvState};

/// Shrinks [ClusterConfig]'s timeouts so tests that rely on recovery firing don't sit for
/// multiple seconds; the phase/recovery timeouts still have to be long enough that a healthy
/// round trip across in-process channels never falsely trips them.
pub fn short_config(replica_id: ReplicaId, peers: Vec<ReplicaId>) -> ClusterConfig {
    let mut config = ClusterConfig::new(replica_id, peers);
    config.propose_timeout = Duration::from_secs(2);
    config.phase_timeout = Duration::from_millis(50);
    config.recovery_timeout = Duration::from_millis(500);
    config.sync_delay = Duration::from_millis(5);
    config
}

/// A running cluster of `Kv` replicas wired together over an in-process [ChannelNetwork].
pub struct Harness {
    replicas: HashMap<ReplicaId, ReplicaHandle<Kv>>,
}

impl Harness {
    /// Start `cluster_size` replicas, ids `0..cluster_size`, each fully connected to every other.
    pub fn new(cluster_size: u32) -> Self {
        let ids: Vec<ReplicaId> = (0..cluster_size).map(ReplicaId::new).collect();
        let (network, mut inboxes) = ChannelNetwork::new(&ids);
        let mut replicas = HashMap::new();
        for &id in &ids {
            let config = short_config(id, ids.clone());
            let transport = network.transport_for(id);
            let inbound = inboxes
                .remove(&id)
                .expect("ChannelNetwork registers one inbox per replica it was built with");
            let handle = start(config, Kv, transport, inbound, KvState::default());
            replicas.insert(id, handle);
        }
        Self { replicas }
    }

    /// Propose `command` at replica `replica`, blocking until it commits and executes.
    pub fn propose(&self, replica: u32, command: KvCommand) -> Result<KvResult, Error> {
        self.replicas[&ReplicaId::new(replica)].propose(command)
    }

    /// The handle for one replica, for inspecting [eparl::ReplicaInfo] or proposing repeatedly.
    pub fn replica(&self, replica: u32) -> &ReplicaHandle<Kv> {
        &self.replicas[&ReplicaId::new(replica)]
    }

    /// Drop `replica`'s handle, stopping its dispatcher thread -- simulates that replica's
    /// process crashing, for exercising recovery.
    pub fn crash(&mut self, replica: u32) {
        self.replicas.remove(&ReplicaId::new(replica));
    }

    pub fn cluster_size(&self) -> u32 {
        self.replicas.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_replica_put_get() {
        let harness = Harness::new(1);
        let put = harness.propose(
            0,
            KvCommand::Put {
                key: "x".to_string(),
                value: 1,
            },
        );
        assert_eq!(put, Ok(KvResult::Put));
        let get = harness.propose(
            0,
            KvCommand::Get {
                key: "x".to_string(),
            },
        );
        assert_eq!(get, Ok(KvResult::Get(Some(1))));
    }

    #[test]
    fn three_replicas_fast_path_converges() {
        let harness = Harness::new(3);
        let put = harness.propose(
            1,
            KvCommand::Put {
                key: "x".to_string(),
                value: 7,
            },
        );
        assert_eq!(put, Ok(KvResult::Put));
        let get = harness.propose(
            2,
            KvCommand::Get {
                key: "x".to_string(),
            },
        );
        assert_eq!(get, Ok(KvResult::Get(Some(7))));
    }
}
