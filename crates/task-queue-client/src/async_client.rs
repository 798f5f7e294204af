use crate::{ClientError, Result};
use task_queue_core::{LeasedTask, TaskId};
use task_queue_protocol::{Command, Frame, LineCodec, ProtocolError};

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt};
use tracing::debug;

/// Async client for the broker's line protocol.
///
/// Holds one connection; requests are sent one at a time and each waits for
/// its reply.
pub struct TaskQueueAsyncClient {
    framed: Framed<TcpStream, LineCodec>,
}

impl TaskQueueAsyncClient {
    /// Connect to broker
    pub async fn connect(broker_address: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(broker_address)
            .await
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;

        Ok(TaskQueueAsyncClient {
            framed: Framed::new(stream, LineCodec::new()),
        })
    }

    /// Add a task, deriving the declared length from `data`
    pub async fn add(&mut self, queue: &str, data: &str) -> Result<TaskId> {
        self.add_with_length(queue, data.len(), data).await
    }

    /// Add a task with an explicit declared length
    pub async fn add_with_length(&mut self, queue: &str, length: usize, data: &str) -> Result<TaskId> {
        let reply = self
            .request(Command::Add {
                queue: queue.to_string(),
                length,
                data: data.to_string(),
            })
            .await?;

        parse_task_id(&reply)
    }

    /// Lease the next task from `queue`, if any
    pub async fn get(&mut self, queue: &str) -> Result<Option<LeasedTask>> {
        let reply = self
            .request(Command::Get {
                queue: queue.to_string(),
            })
            .await?;

        if reply == "NONE" {
            return Ok(None);
        }

        let mut parts = reply.splitn(3, ' ');
        let (Some(id), Some(length), Some(data)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(unexpected(&reply));
        };

        Ok(Some(LeasedTask {
            id: parse_task_id(id)?,
            length: length.parse().map_err(|_| unexpected(&reply))?,
            data: data.to_string(),
        }))
    }

    /// Acknowledge (remove) a task. `false` if the broker does not know it.
    pub async fn ack(&mut self, queue: &str, task_id: &TaskId) -> Result<bool> {
        let reply = self
            .request(Command::Ack {
                queue: queue.to_string(),
                id: task_id.to_string(),
            })
            .await?;

        parse_bool(&reply)
    }

    /// Whether `queue` still holds the task
    pub async fn contains(&mut self, queue: &str, task_id: &TaskId) -> Result<bool> {
        let reply = self
            .request(Command::In {
                queue: queue.to_string(),
                id: task_id.to_string(),
            })
            .await?;

        parse_bool(&reply)
    }

    /// Ask the broker to write a snapshot
    pub async fn save(&mut self) -> Result<()> {
        match self.request(Command::Save).await?.as_str() {
            "OK" => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Send an arbitrary line and return the raw reply
    pub async fn send_raw(&mut self, line: &str) -> Result<String> {
        self.framed.send(line).await?;
        self.read_reply().await
    }

    async fn request(&mut self, command: Command) -> Result<String> {
        debug!("Sending {} command", command.name());
        self.framed.send(command).await?;

        let reply = self.read_reply().await?;
        if reply == "ERROR" {
            return Err(ClientError::ServerError);
        }
        Ok(reply)
    }

    async fn read_reply(&mut self) -> Result<String> {
        match self.framed.next().await {
            Some(Ok(Frame::Line(line))) => Ok(line),
            Some(Ok(Frame::Oversized)) => Err(ProtocolError::LineTooLong {
                max: self.framed.codec().max_length(),
            }
            .into()),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::ConnectionError("Connection closed".to_string())),
        }
    }
}

fn unexpected(reply: &str) -> ClientError {
    ClientError::ProtocolError(format!("Unexpected response: {:?}", reply))
}

fn parse_task_id(text: &str) -> Result<TaskId> {
    TaskId::parse_str(text).map_err(|_| unexpected(text))
}

fn parse_bool(reply: &str) -> Result<bool> {
    match reply {
        "YES" => Ok(true),
        "NO" => Ok(false),
        other => Err(unexpected(other)),
    }
}
