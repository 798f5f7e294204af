mod command;
mod response;
mod codec;

pub use command::Command;
pub use response::Response;
pub use codec::{Frame, LineCodec};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} expects {expected} fields, got {actual}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{command} has an empty {field}")]
    EmptyField {
        command: &'static str,
        field: &'static str,
    },

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("Line exceeds maximum length of {max} bytes")]
    LineTooLong { max: usize },

    #[error("Line breaks are not allowed inside a message")]
    EmbeddedNewline,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum line size: a full payload plus room for the verb, queue name and length
pub const MAX_LINE_LENGTH: usize = task_queue_core::MAX_PAYLOAD_SIZE + 1024;
