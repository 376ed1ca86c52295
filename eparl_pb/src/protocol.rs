//! Core data types shared by every eparl wire message: replica/instance identifiers, ballots, and
//! the instance record itself.  Modeled after the teacher's `paxos_pb` crate, but IDs here are
//! dense replica-assigned integers rather than `one_two_eight`-style random 128-bit ids, because
//! cluster membership is small and static (see the distilled spec's cluster-size non-goal).

use prototk_derive::Message;

///////////////////////////////////////////// ReplicaId ////////////////////////////////////////////

/// Identifies one replica in the (static) cluster.  Replicas are numbered `0..cluster_size`.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, Ord, PartialEq, PartialOrd)]
pub struct ReplicaId {
    #[prototk(1, uint32)]
    pub id: u32,
}

impl ReplicaId {
    pub const fn new(id: u32) -> Self {
        Self { id }
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica:{}", self.id)
    }
}

impl From<u32> for ReplicaId {
    fn from(id: u32) -> Self {
        Self { id }
    }
}

///////////////////////////////////////////// InstanceId ////////////////////////////////////////////

/// `(replica_id, instance_number)`.  `replica_id` is the replica that first proposed the command;
/// `instance_number` is that replica's monotonic local counter.  Uniqueness of the pair is
/// guaranteed by the originating replica.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, Ord, PartialEq, PartialOrd)]
pub struct InstanceId {
    #[prototk(1, message)]
    pub replica_id: ReplicaId,
    #[prototk(2, uint64)]
    pub instance_number: u64,
}

impl InstanceId {
    pub const fn new(replica_id: ReplicaId, instance_number: u64) -> Self {
        Self {
            replica_id,
            instance_number,
        }
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.replica_id, self.instance_number)
    }
}

////////////////////////////////////////////// Ballot ///////////////////////////////////////////////

/// A totally-ordered recovery token, compared lexicographically by `(epoch, counter,
/// replica_id)`.  A fresh instance starts at epoch 0, counter 0.  Recovery bumps the epoch
/// strictly past whatever epoch the recovering replica has observed for the instance.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, Ord, PartialEq, PartialOrd)]
pub struct Ballot {
    #[prototk(1, uint64)]
    pub epoch: u64,
    #[prototk(2, uint64)]
    pub counter: u64,
    #[prototk(3, message)]
    pub replica_id: ReplicaId,
}

impl Ballot {
    /// The smallest possible ballot: epoch 0, counter 0, replica 0.
    pub const BOTTOM: Ballot = Ballot {
        epoch: 0,
        counter: 0,
        replica_id: ReplicaId::new(0),
    };

    /// `initial(replica)`: the ballot a freshly-proposed instance starts with.
    pub const fn initial(replica: ReplicaId) -> Self {
        Self {
            epoch: 0,
            counter: 0,
            replica_id: replica,
        }
    }

    /// `higher_than(other, replica)`: a ballot strictly greater than `other`, attributed to
    /// `replica`.  `higher_than(None, replica) == initial(replica)` per the distilled spec; this
    /// is modeled with `Option<Ballot>` at the call site rather than a sentinel "nil" ballot.
    pub const fn higher_than(other: Ballot, replica: ReplicaId) -> Self {
        Self {
            epoch: other.epoch + 1,
            counter: 0,
            replica_id: replica,
        }
    }
}

////////////////////////////////////////////// Status ///////////////////////////////////////////////

/// The instance's position along the monotone status lattice.  Declaration order is significant:
/// the derived [`Ord`] implementation is exactly the lattice order `None < PreAccepted < Accepted
/// < Committed < Executed` the distilled spec requires.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, Ord, PartialEq, PartialOrd)]
pub enum Status {
    #[prototk(1, message)]
    #[default]
    None,
    #[prototk(2, message)]
    PreAccepted,
    #[prototk(3, message)]
    Accepted,
    #[prototk(4, message)]
    Committed,
    #[prototk(5, message)]
    Executed,
}

///////////////////////////////////////////////// Instance //////////////////////////////////////////

/// The protocol record for a single command.  `command` is empty while the instance is a
/// recovery placeholder that has not yet observed any proposer's payload.
#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct Instance {
    #[prototk(1, message)]
    pub id: InstanceId,
    #[prototk(2, bytes)]
    pub command: Vec<u8>,
    #[prototk(3, uint64)]
    pub seq: u64,
    #[prototk(4, message)]
    pub deps: Vec<InstanceId>,
    #[prototk(5, message)]
    pub status: Status,
    #[prototk(6, message)]
    pub ballot: Ballot,
}

impl Instance {
    /// True iff this record is a bare recovery placeholder with no known command.
    pub fn is_placeholder(&self) -> bool {
        self.command.is_empty() && self.status == Status::None
    }
}
