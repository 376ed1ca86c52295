//! The ten wire message kinds replicas exchange, mirrored field-for-field from the distilled
//! spec's wire table.  Every message carries owned fields (`Vec<u8>`, `Vec<InstanceId>`, ...) with
//! no lifetime parameters, in the style of the teacher's `paxos_pb` messages.

use prototk_derive::Message;

use crate::protocol::{Ballot, Instance, InstanceId, ReplicaId, Status};

////////////////////////////////////////////// PreAccept /////////////////////////////////////////////

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct PreAccept {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, bytes)]
    pub command: Vec<u8>,
    #[prototk(3, uint64)]
    pub seq: u64,
    #[prototk(4, message)]
    pub deps: Vec<InstanceId>,
    #[prototk(5, message)]
    pub ballot: Ballot,
}

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct PreAcceptOK {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, uint64)]
    pub seq: u64,
    #[prototk(3, message)]
    pub deps: Vec<InstanceId>,
    #[prototk(4, message)]
    pub from: ReplicaId,
}

///////////////////////////////////////////////// Accept /////////////////////////////////////////////

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct Accept {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, uint64)]
    pub seq: u64,
    #[prototk(3, message)]
    pub deps: Vec<InstanceId>,
    #[prototk(4, message)]
    pub ballot: Ballot,
}

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct AcceptOK {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, message)]
    pub from: ReplicaId,
}

///////////////////////////////////////////////// Commit //////////////////////////////////////////////

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct Commit {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, bytes)]
    pub command: Vec<u8>,
    #[prototk(3, uint64)]
    pub seq: u64,
    #[prototk(4, message)]
    pub deps: Vec<InstanceId>,
}

///////////////////////////////////////////////// Prepare /////////////////////////////////////////////

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct Prepare {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, message)]
    pub ballot: Ballot,
    #[prototk(3, message)]
    pub from: ReplicaId,
}

/// `instance` is empty (`Instance::default()`, status `None`) when the respondent has never heard
/// of the instance; `leader_responded` distinguishes "nothing known" from "the original proposer
/// itself replied with nothing new", which the recovery analyzer treats differently (see
/// `PrepareOK` handling in the distilled spec's recovery table).
#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct PrepareOK {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, message)]
    pub instance: Instance,
    #[prototk(3, Bool)]
    pub leader_responded: bool,
    #[prototk(4, message)]
    pub from: ReplicaId,
}

////////////////////////////////////////////// TryPreAccept //////////////////////////////////////////

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct TryPreAccept {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, bytes)]
    pub command: Vec<u8>,
    #[prototk(3, uint64)]
    pub seq: u64,
    #[prototk(4, message)]
    pub deps: Vec<InstanceId>,
    #[prototk(5, message)]
    pub ballot: Ballot,
}

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct TryPreAcceptOK {
    #[prototk(1, message)]
    pub instance_id: InstanceId,
    #[prototk(2, Bool)]
    pub ok: bool,
    #[prototk(3, message)]
    pub from: ReplicaId,
    #[prototk(4, message)]
    pub conflict_replica: ReplicaId,
    #[prototk(5, message)]
    pub conflict_instance: InstanceId,
    #[prototk(6, message)]
    pub conflict_status: Status,
}

///////////////////////////////////////////// Sync ////////////////////////////////////////////////////

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct SyncRequest {
    #[prototk(1, message)]
    pub from: ReplicaId,
}

#[derive(Clone, Debug, Default, Message, PartialEq)]
pub struct SyncResponse {
    #[prototk(1, message)]
    pub from: ReplicaId,
    #[prototk(2, message)]
    pub instances: Vec<Instance>,
}

///////////////////////////////////////////// Message envelope ///////////////////////////////////////

/// Every wire message a replica can receive, tagged so `Transport` implementations can ship a
/// single enum rather than ten distinct channels.
#[derive(Clone, Debug, Message, PartialEq)]
pub enum ReplicaMessage {
    #[prototk(1, message)]
    PreAccept(PreAccept),
    #[prototk(2, message)]
    PreAcceptOK(PreAcceptOK),
    #[prototk(3, message)]
    Accept(Accept),
    #[prototk(4, message)]
    AcceptOK(AcceptOK),
    #[prototk(5, message)]
    Commit(Commit),
    #[prototk(6, message)]
    Prepare(Prepare),
    #[prototk(7, message)]
    PrepareOK(PrepareOK),
    #[prototk(8, message)]
    TryPreAccept(TryPreAccept),
    #[prototk(9, message)]
    TryPreAcceptOK(TryPreAcceptOK),
    #[prototk(10, message)]
    SyncRequest(SyncRequest),
    #[prototk(11, message)]
    SyncResponse(SyncResponse),
}

impl Default for ReplicaMessage {
    fn default() -> Self {
        Self::SyncRequest(SyncRequest::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffertk::{stack_pack, Unpacker};

    #[test]
    fn pre_accept_round_trips() {
        let msg = PreAccept {
            instance_id: InstanceId::new(ReplicaId::new(0), 1),
            command: b"put x 1".to_vec(),
            seq: 1,
            deps: vec![InstanceId::new(ReplicaId::new(1), 4)],
            ballot: Ballot::initial(ReplicaId::new(0)),
        };
        let buf = stack_pack(&msg).to_vec();
        let mut up = Unpacker::new(buf.as_slice());
        let decoded: PreAccept = up.unpack().unwrap();
        assert!(up.remain().is_empty());
        assert_eq!(msg, decoded);
    }

    #[test]
    fn replica_message_envelope_round_trips() {
        let msg = ReplicaMessage::Commit(Commit {
            instance_id: InstanceId::new(ReplicaId::new(2), 7),
            command: b"put y 2".to_vec(),
            seq: 3,
            deps: vec![],
        });
        let buf = stack_pack(&msg).to_vec();
        let mut up = Unpacker::new(buf.as_slice());
        let decoded: ReplicaMessage = up.unpack().unwrap();
        assert!(up.remain().is_empty());
        assert_eq!(msg, decoded);
    }

    #[test]
    fn try_pre_accept_ok_round_trips() {
        let msg = TryPreAcceptOK {
            instance_id: InstanceId::new(ReplicaId::new(0), 9),
            ok: false,
            from: ReplicaId::new(2),
            conflict_replica: ReplicaId::new(1),
            conflict_instance: InstanceId::new(ReplicaId::new(1), 3),
            conflict_status: Status::Accepted,
        };
        let buf = stack_pack(&msg).to_vec();
        let mut up = Unpacker::new(buf.as_slice());
        let decoded: TryPreAcceptOK = up.unpack().unwrap();
        assert!(up.remain().is_empty());
        assert_eq!(msg, decoded);
    }
}
