//! Stand up an in-process eparl cluster and fire a couple of `Put`/`Get` commands at it, printing
//! what comes back. A quick way to watch the fast path converge without writing a test.

use arrrg::CommandLine;
use arrrg_derive::CommandLine;

use eparl_sim::{Harness, KvCommand};

#[derive(CommandLine, Debug, Default, Eq, PartialEq)]
struct Options {
    #[arrrg(optional, "Number of replicas in the demo cluster.", "N")]
    replicas: Option<u32>,
    #[arrrg(optional, "Key to Put and then Get.", "KEY")]
    key: Option<String>,
    #[arrrg(optional, "Value to Put under --key.", "VALUE")]
    value: Option<i64>,
}

fn main() {
    let (options, free) = Options::from_command_line_relaxed(
        "Usage: eparl-demo [--replicas N] [--key KEY] [--value VALUE]",
    );
    if !free.is_empty() {
        panic!("free arguments are not accepted");
    }

    let cluster_size = options.replicas.unwrap_or(3);
    let key = options.key.unwrap_or_else(|| "hello".to_string());
    let value = options.value.unwrap_or(42);

    let harness = Harness::new(cluster_size);
    println!("started a {cluster_size}-replica eparl cluster");

    let put = harness.propose(0, KvCommand::Put { key: key.clone(), value });
    println!("Put({key}, {value}) at replica 0 -> {put:?}");

    for replica in 0..cluster_size {
        let get = harness.propose(replica, KvCommand::Get { key: key.clone() });
        println!("Get({key}) at replica {replica} -> {get:?}");
    }
}
