//! Cluster configuration: constructed programmatically at [crate::start] time. There is no
//! on-disk configuration file format -- out of scope per the no-persistence non-goal -- only this
//! struct and, for the demo binary, `arrrg`-parsed command-line flags that build one.

use std::time::Duration;

use eparl_pb::ReplicaId;

/// Static, whole-cluster configuration known to every replica at startup. Membership never
/// changes after `start` -- dynamic membership change is a named non-goal.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// This process's identity.
    pub replica_id: ReplicaId,
    /// Every replica in the cluster, including `replica_id`.
    pub peers: Vec<ReplicaId>,
    /// Wall-clock timeout a proposer waits before giving up with [crate::error::Error] -- the
    /// caller-supplied default the spec calls out as 5 seconds in the source.
    pub propose_timeout: Duration,
    /// Per-phase timeout (PreAccept, Accept) before an instance's state machine gives up on the
    /// fast/slow path and starts recovery.
    pub phase_timeout: Duration,
    /// How long recovery is allowed to run before surfacing `RecoveryTimeout` to any waiting
    /// proposer.
    pub recovery_timeout: Duration,
    /// How long to wait after start before broadcasting `SyncRequest`, to give peer discovery a
    /// moment to settle.
    pub sync_delay: Duration,
}

impl ClusterConfig {
    /// `replica_id` must appear in `peers`.
    pub fn new(replica_id: ReplicaId, peers: Vec<ReplicaId>) -> Self {
        debug_assert!(peers.contains(&replica_id));
        Self {
            replica_id,
            peers,
            propose_timeout: Duration::from_secs(5),
            phase_timeout: Duration::from_millis(250),
            recovery_timeout: Duration::from_secs(2),
            sync_delay: Duration::from_millis(50),
        }
    }

    pub fn cluster_size(&self) -> u32 {
        self.peers.len() as u32
    }
}
