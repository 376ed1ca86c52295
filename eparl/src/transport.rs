//! The transport seam: "the transport that ships protocol messages between replicas" that the
//! distilled spec treats as an external collaborator. `eparl` only needs fire-and-forget
//! send/broadcast; it never blocks waiting on a reply from the transport itself (responses are
//! ordinary inbound messages that re-enter the dispatcher's event loop). No transport security is
//! implemented here -- that's a named non-goal, and wiring a real network transport (TCP, UDP, ...)
//! is left as an integration point behind this trait.

use eparl_pb::{ReplicaId, ReplicaMessage};

/// Ships [ReplicaMessage]s between replicas. Implementations must not block the caller on a
/// network round trip; `send`/`broadcast` are best-effort and fire-and-forget, matching the
/// distilled spec's "message loss, duplication, and reordering are all tolerated" model.
pub trait Transport: Send + Sync {
    /// Send `message` to a single peer. Silently dropped if `to` is unreachable.
    fn send(&self, to: ReplicaId, message: ReplicaMessage);

    /// Send `message` to every configured peer, including `self` -- the coordinator never
    /// special-cases its own loopback reply, per the distilled spec's PreAccept note.
    fn broadcast(&self, message: ReplicaMessage);

    /// The statically configured cluster membership this transport knows how to reach.
    fn peers(&self) -> Vec<ReplicaId>;

    /// The subset of `peers()` this transport currently believes it can reach -- a peer drops out
    /// once a `send`/`broadcast` to it fails to deliver, and rejoins the moment one succeeds again.
    /// Implementations with no way to tell a live peer from a dead one fall back to reporting the
    /// full membership list, same as every caller already assumed before this method existed.
    fn live_peers(&self) -> Vec<ReplicaId> {
        self.peers()
    }
}

///////////////////////////////////////////// channel ///////////////////////////////////////////////

/// An in-process reference [Transport] built on [std::sync::mpsc] channels: one channel per
/// replica, all registered up front in a [ChannelNetwork]. This is what the deterministic test
/// harness and the demo binary use; a real network transport is an integration exercise outside
/// this workspace's scope.
pub mod channel {
    use std::collections::HashMap;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};

    use eparl_pb::{ReplicaId, ReplicaMessage};

    use super::Transport;

    /// An inbound message together with the identity of the peer that sent it. Wire messages that
    /// need a reply address (`PreAccept`, `Accept`, `Commit`, `TryPreAccept`) rely on this
    /// envelope rather than carrying a `from` field of their own.
    #[derive(Clone, Debug)]
    pub struct Envelope {
        pub from: ReplicaId,
        pub message: ReplicaMessage,
    }

    /// Registers one channel per replica and hands out a [ChannelTransport] bound to each.
    pub struct ChannelNetwork {
        senders: Arc<HashMap<ReplicaId, Sender<Envelope>>>,
        peers: Vec<ReplicaId>,
        liveness: Arc<Mutex<HashMap<ReplicaId, bool>>>,
    }

    impl ChannelNetwork {
        /// Build a fully-connected in-process network over `replicas`. Returns the network (used
        /// to mint a [ChannelTransport] per replica) and the inbound [Receiver] for each replica.
        pub fn new(replicas: &[ReplicaId]) -> (Self, HashMap<ReplicaId, Receiver<Envelope>>) {
            let mut senders = HashMap::new();
            let mut receivers = HashMap::new();
            let mut liveness = HashMap::new();
            for &replica in replicas {
                let (tx, rx) = mpsc::channel();
                senders.insert(replica, tx);
                receivers.insert(replica, rx);
                liveness.insert(replica, true);
            }
            let mut peers: Vec<ReplicaId> = replicas.to_vec();
            peers.sort();
            (
                Self {
                    senders: Arc::new(senders),
                    peers,
                    liveness: Arc::new(Mutex::new(liveness)),
                },
                receivers,
            )
        }

        /// Mint the [ChannelTransport] `from` should use to reach every other replica in this
        /// network (and itself, for loopback).
        pub fn transport_for(&self, from: ReplicaId) -> ChannelTransport {
            ChannelTransport {
                from,
                senders: Arc::clone(&self.senders),
                peers: self.peers.clone(),
                liveness: Arc::clone(&self.liveness),
            }
        }
    }

    /// A [Transport] bound to one replica's identity, backed by [ChannelNetwork]'s channels.
    /// `liveness` is shared by every [ChannelTransport] minted from the same [ChannelNetwork]:
    /// whichever replica notices a peer's channel has gone away marks it dead for everyone, since
    /// an in-process `mpsc` [Sender] only ever fails once its matching [Receiver] is dropped --
    /// this harness's stand-in for "the peer's process exited".
    #[derive(Clone)]
    pub struct ChannelTransport {
        from: ReplicaId,
        senders: Arc<HashMap<ReplicaId, Sender<Envelope>>>,
        peers: Vec<ReplicaId>,
        liveness: Arc<Mutex<HashMap<ReplicaId, bool>>>,
    }

    impl Transport for ChannelTransport {
        fn send(&self, to: ReplicaId, message: ReplicaMessage) {
            let delivered = self.senders.get(&to).is_some_and(|tx| {
                tx.send(Envelope {
                    from: self.from,
                    message,
                })
                .is_ok()
            });
            if let Ok(mut liveness) = self.liveness.lock() {
                liveness.insert(to, delivered);
            }
        }

        fn broadcast(&self, message: ReplicaMessage) {
            for peer in &self.peers {
                self.send(*peer, message.clone());
            }
        }

        fn peers(&self) -> Vec<ReplicaId> {
            self.peers.clone()
        }

        fn live_peers(&self) -> Vec<ReplicaId> {
            let liveness = self.liveness.lock().unwrap();
            self.peers
                .iter()
                .copied()
                .filter(|p| liveness.get(p).copied().unwrap_or(true))
                .collect()
        }
    }
}
