//! A toy key/value [eparl::CommandModule]: `Put(key, value)` and `Get(key)`. Two commands
//! interfere iff they name the same key, the textbook ePaxos example of the interference
//! predicate's job -- `Put("x", 1)` and `Put("x", 2)` must not be reordered relative to each
//! other, but `Put("x", 1)` and `Put("y", 2)` may commit and execute in either order on any
//! replica.

use std::collections::HashMap;

use eparl::{CommandModule, Error};

#[derive(Clone, Debug, PartialEq)]
pub enum KvCommand {
    Put { key: String, value: i64 },
    Get { key: String },
    Noop,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KvResult {
    Put,
    Get(Option<i64>),
    Noop,
}

/// The application state `execute` mutates. Owned exclusively by the executor thread.
#[derive(Default)]
pub struct KvState {
    table: HashMap<String, i64>,
}

impl KvState {
    pub fn get(&self, key: &str) -> Option<i64> {
        self.table.get(key).copied()
    }
}

/// The demo/test [CommandModule]. Holds no state of its own -- all mutable state lives in
/// [KvState], per the trait's contract.
pub struct Kv;

impl CommandModule for Kv {
    type Command = KvCommand;
    type Result = KvResult;
    type State = KvState;

    fn interferes(&self, a: &Self::Command, b: &Self::Command) -> bool {
        match (key_of(a), key_of(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn execute(&self, command: &Self::Command, state: &mut Self::State) -> Self::Result {
        match command {
            KvCommand::Put { key, value } => {
                state.table.insert(key.clone(), *value);
                KvResult::Put
            }
            KvCommand::Get { key } => KvResult::Get(state.table.get(key).copied()),
            KvCommand::Noop => KvResult::Noop,
        }
    }

    fn encode(&self, command: &Self::Command) -> Vec<u8> {
        match command {
            KvCommand::Put { key, value } => format!("put\n{key}\n{value}").into_bytes(),
            KvCommand::Get { key } => format!("get\n{key}").into_bytes(),
            KvCommand::Noop => b"noop".to_vec(),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Command, Error> {
        let text = String::from_utf8_lossy(bytes);
        let mut parts = text.splitn(3, '\n');
        let command = match parts.next() {
            Some("put") => {
                let key = parts.next().unwrap_or_default().to_string();
                let value = parts.next().unwrap_or_default().parse().unwrap_or(0);
                KvCommand::Put { key, value }
            }
            Some("get") => KvCommand::Get {
                key: parts.next().unwrap_or_default().to_string(),
            },
            _ => KvCommand::Noop,
        };
        Ok(command)
    }

    fn noop(&self) -> Self::Command {
        KvCommand::Noop
    }
}

/// A command's key, or `None` for `Noop` -- `Get` reads never interfere with each other, only
/// with a `Put` (or another `Get`... no, reads commute) to the same key, so it's the key alone
/// that drives `interferes`, not the command's read/write flavor.
fn key_of(command: &KvCommand) -> Option<&str> {
    match command {
        KvCommand::Put { key, .. } => Some(key),
        KvCommand::Get { key } => Some(key),
        KvCommand::Noop => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interferes_same_key() {
        let kv = Kv;
        let a = KvCommand::Put {
            key: "x".to_string(),
            value: 1,
        };
        let b = KvCommand::Put {
            key: "x".to_string(),
            value: 2,
        };
        assert!(kv.interferes(&a, &b));
    }

    #[test]
    fn does_not_interfere_different_key() {
        let kv = Kv;
        let a = KvCommand::Put {
            key: "x".to_string(),
            value: 1,
        };
        let b = KvCommand::Put {
            key: "y".to_string(),
            value: 2,
        };
        assert!(!kv.interferes(&a, &b));
    }

    #[test]
    fn noop_interferes_with_nothing() {
        let kv = Kv;
        let noop = kv.noop();
        let put = KvCommand::Put {
            key: "x".to_string(),
            value: 1,
        };
        assert!(!kv.interferes(&noop, &put));
    }

    #[test]
    fn execute_put_then_get() {
        let kv = Kv;
        let mut state = KvState::default();
        let put = KvCommand::Put {
            key: "x".to_string(),
            value: 42,
        };
        assert_eq!(kv.execute(&put, &mut state), KvResult::Put);
        let get = KvCommand::Get {
            key: "x".to_string(),
        };
        assert_eq!(kv.execute(&get, &mut state), KvResult::Get(Some(42)));
    }

    #[test]
    fn encode_decode_round_trips() {
        let kv = Kv;
        let put = KvCommand::Put {
            key: "x".to_string(),
            value: -7,
        };
        let bytes = kv.encode(&put);
        assert_eq!(kv.decode(&bytes).unwrap(), put);
    }
}
