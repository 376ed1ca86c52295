#![doc = include_str!("../README.md")]

pub mod error;
pub mod messages;
pub mod protocol;

pub use error::Error;
pub use protocol::*;
pub use messages::*;
