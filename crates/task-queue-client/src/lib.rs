mod async_client;

pub use async_client::TaskQueueAsyncClient;
pub use task_queue_core::{LeasedTask, TaskId};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Server rejected the command")]
    ServerError,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<task_queue_protocol::ProtocolError> for ClientError {
    fn from(e: task_queue_protocol::ProtocolError) -> Self {
        match e {
            task_queue_protocol::ProtocolError::IoError(io) => ClientError::IoError(io),
            other => ClientError::ProtocolError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
