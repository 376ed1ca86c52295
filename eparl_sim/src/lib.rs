#![doc = include_str!("../README.md")]

pub mod harness;
pub mod kv;

pub use harness::Harness;
pub use kv::{Kv, KvCommand, KvResult, KvState};
