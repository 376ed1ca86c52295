//! The engine's error taxonomy (see the crate-level error-handling design notes).
//!
//! Only the terminal-for-this-call cases surface as [Error] values. Transient failures (message
//! loss, a single unreachable peer, a rejected ballot) are logged and counted, never returned.
//! Recoverable failures (coordinator suspected dead, a missing dependency at execution time)
//! trigger recovery internally. Contract violations -- ballot regression, status regression, a
//! committed instance observed with a different value -- are `assert!`/`debug_assert!` failures
//! at the point of write in [crate::store], not `Result`s: the distilled spec classifies them as
//! bugs, not conditions to recover from.

use biometrics::Counter;
use prototk_derive::Message;

use zerror_core::ErrorCore;

use eparl_pb::InstanceId;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static NO_QUORUM: Counter = Counter::new("eparl.error.no_quorum");
static RECOVERY_TIMEOUT: Counter = Counter::new("eparl.error.recovery_timeout");
static SERIALIZATION_ERROR: Counter = Counter::new("eparl.error.serialization");

/// Register this module's biometrics with the provided collector.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&NO_QUORUM);
    collector.register_counter(&RECOVERY_TIMEOUT);
    collector.register_counter(&SERIALIZATION_ERROR);
}

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors surfaced to a caller of [crate::ReplicaHandle::propose].
#[derive(Message, zerror_derive::Z)]
pub enum Error {
    #[prototk(315392, message)]
    Success {
        #[prototk(1, message)]
        core: ErrorCore,
    },
    /// Fewer than slow-quorum peers were reachable at proposal time.
    #[prototk(315393, message)]
    NoQuorum {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, uint32)]
        cluster_size: u32,
        #[prototk(3, uint32)]
        available: u32,
        #[prototk(4, uint32)]
        needed: u32,
    },
    /// Recovery was driven to completion or given up on without ever observing the instance
    /// commit.
    #[prototk(315394, message)]
    RecoveryTimeout {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, message)]
        instance_id: InstanceId,
    },
    /// A wire message failed to encode or decode.
    #[prototk(315395, message)]
    SerializationError {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, message)]
        what: eparl_pb::Error,
    },
}

impl Default for Error {
    fn default() -> Self {
        Self::Success {
            core: ErrorCore::default(),
        }
    }
}

impl Error {
    pub fn no_quorum(cluster_size: u32, available: u32, needed: u32) -> Self {
        Self::NoQuorum {
            core: ErrorCore::new(
                "eparl@rescrv.net",
                "insufficient live peers to form a quorum",
                &NO_QUORUM,
            ),
            cluster_size,
            available,
            needed,
        }
    }

    pub fn recovery_timeout(instance_id: InstanceId) -> Self {
        Self::RecoveryTimeout {
            core: ErrorCore::new(
                "eparl@rescrv.net",
                "recovery did not conclude before the caller's deadline",
                &RECOVERY_TIMEOUT,
            ),
            instance_id,
        }
    }
}

impl From<eparl_pb::Error> for Error {
    fn from(what: eparl_pb::Error) -> Self {
        Self::SerializationError {
            core: ErrorCore::new(
                "eparl@rescrv.net",
                "wire message failed to encode or decode",
                &SERIALIZATION_ERROR,
            ),
            what,
        }
    }
}
