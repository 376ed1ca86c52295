//! The user command contract: the only place application logic touches the engine.
//!
//! A [CommandModule] owns the application state and supplies the two predicates the whole
//! protocol is built around -- `interferes` decides the interference (dependency) order,
//! `execute` applies a command once the executor has decided it is safe to run. Commands and
//! results travel on the wire embedded in `PreAccept`/`Commit`/`TryPreAccept` as opaque bytes, so
//! the module also owns their encoding.

use crate::error::Error;

/// Supplied once at [crate::start] time; shared by the coordinator and the executor.
///
/// `interferes` must be symmetric (`interferes(a, b) == interferes(b, a)`) and reflexive for
/// commands that conflict with themselves -- two proposals for the same key, say. Two commands
/// that do not interfere may execute in either order, on any replica, with no coordination.
///
/// `execute` must be deterministic: the same command applied to the same state must produce the
/// same result and the same new state everywhere, because the executor's whole job is making sure
/// every replica calls `execute` in the same order over the same committed commands.
pub trait CommandModule: Send + Sync + 'static {
    /// The application-level command type proposed by callers.
    type Command: Clone + Send + Sync;
    /// The value returned to the caller once a command executes.
    type Result: Clone + Send;
    /// The application state `execute` mutates. Owned exclusively by the executor.
    type State: Send;

    /// True iff `a` and `b` must not be reordered relative to each other.
    fn interferes(&self, a: &Self::Command, b: &Self::Command) -> bool;

    /// Apply `command` to `state`, producing the result the original proposer observes.
    fn execute(&self, command: &Self::Command, state: &mut Self::State) -> Self::Result;

    /// Encode a command for the wire. Round-trips through [CommandModule::decode].
    fn encode(&self, command: &Self::Command) -> Vec<u8>;

    /// Decode a command off the wire.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Command, Error>;

    /// A command that interferes with nothing and changes no state, used to seal a recovery slot
    /// that no replica in the responding quorum had ever heard of (see [crate::recovery]).
    fn noop(&self) -> Self::Command;
}
