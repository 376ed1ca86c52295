use prototk_derive::Message;

use zerror_core::ErrorCore;

///////////////////////////////////////////////// Error /////////////////////////////////////////////

/// Errors raised while encoding or decoding eparl wire messages.
#[derive(Message, zerror_derive::Z)]
pub enum Error {
    #[prototk(278784, message)]
    Success {
        #[prototk(1, message)]
        core: ErrorCore,
    },
    #[prototk(278785, message)]
    SerializationError {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, message)]
        what: prototk::Error,
    },
}

impl Default for Error {
    fn default() -> Self {
        Self::Success {
            core: ErrorCore::default(),
        }
    }
}

impl From<prototk::Error> for Error {
    fn from(what: prototk::Error) -> Self {
        Self::SerializationError {
            core: ErrorCore::default(),
            what,
        }
    }
}
