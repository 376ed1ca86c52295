#![doc = include_str!("../README.md")]

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod kernel;
pub mod quorum;
pub mod recovery;
pub mod store;
pub mod transport;

pub use command::CommandModule;
pub use config::ClusterConfig;
pub use coordinator::{
    fast_path_commit_count, slow_path_commit_count, start, ReplicaHandle, ReplicaInfo,
};
pub use error::Error;
pub use transport::Transport;

/// Registers every module's `biometrics` counters with `collector`, in the style of the teacher's
/// crate-level aggregators (see e.g. `busyrpc::register_biometrics`).
pub fn register_biometrics(collector: &biometrics::Collector) {
    error::register_biometrics(collector);
    store::register_biometrics(collector);
    executor::register_biometrics(collector);
    coordinator::register_biometrics(collector);
}

/// Registers every module's `tatl` monitors with `hey_listen`.
pub fn register_monitors(hey_listen: &mut tatl::HeyListen) {
    executor::register_monitors(hey_listen);
    coordinator::register_monitors(hey_listen);
}
