use crate::{ProtocolError, Result};
use std::fmt;

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ADD <queue> <length> <data>`
    Add {
        queue: String,
        length: usize,
        data: String,
    },
    /// `GET <queue>`
    Get { queue: String },
    /// `ACK <queue> <id>`
    Ack { queue: String, id: String },
    /// `IN <queue> <id>`
    In { queue: String, id: String },
    /// `SAVE`
    Save,
}

impl Command {
    /// Parse one request line (without its line terminator).
    ///
    /// Fields are separated by single spaces. The line is split into at most
    /// as many fields as the verb takes, so an `ADD` payload keeps any spaces
    /// it contains.
    pub fn parse(line: &str) -> Result<Self> {
        let verb = line.split(' ').next().unwrap_or_default();
        if verb.trim().is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }

        match verb.to_ascii_uppercase().as_str() {
            "ADD" => {
                let [_, queue, length, data] = split_bounded::<4>("ADD", line)?;
                let queue = non_empty("ADD", "queue", queue)?;
                let length = non_empty("ADD", "length", length)?;
                let length = length
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidLength(length.to_string()))?;

                Ok(Command::Add {
                    queue: queue.to_string(),
                    length,
                    data: data.to_string(),
                })
            }
            "GET" => {
                let [_, queue] = split_exact::<2>("GET", line.trim_end())?;
                Ok(Command::Get {
                    queue: non_empty("GET", "queue", queue)?.to_string(),
                })
            }
            "ACK" => {
                let [_, queue, id] = split_exact::<3>("ACK", line.trim_end())?;
                Ok(Command::Ack {
                    queue: non_empty("ACK", "queue", queue)?.to_string(),
                    id: non_empty("ACK", "id", id)?.to_string(),
                })
            }
            "IN" => {
                let [_, queue, id] = split_exact::<3>("IN", line.trim_end())?;
                Ok(Command::In {
                    queue: non_empty("IN", "queue", queue)?.to_string(),
                    id: non_empty("IN", "id", id)?.to_string(),
                })
            }
            "SAVE" => {
                split_exact::<1>("SAVE", line.trim_end())?;
                Ok(Command::Save)
            }
            _ => Err(ProtocolError::UnknownCommand(verb.to_string())),
        }
    }

    /// Upper-case verb, used for logging and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "ADD",
            Command::Get { .. } => "GET",
            Command::Ack { .. } => "ACK",
            Command::In { .. } => "IN",
            Command::Save => "SAVE",
        }
    }
}

/// Split into at most `N` fields; the last one takes the rest of the line.
fn split_bounded<'a, const N: usize>(command: &'static str, line: &'a str) -> Result<[&'a str; N]> {
    let parts: Vec<&str> = line.splitn(N, ' ').collect();
    let actual = parts.len();
    parts.try_into().map_err(|_| ProtocolError::WrongArity {
        command,
        expected: N,
        actual,
    })
}

/// Split into exactly `N` fields.
fn split_exact<'a, const N: usize>(command: &'static str, line: &'a str) -> Result<[&'a str; N]> {
    let parts: Vec<&str> = line.split(' ').collect();
    let actual = parts.len();
    parts.try_into().map_err(|_| ProtocolError::WrongArity {
        command,
        expected: N,
        actual,
    })
}

fn non_empty<'a>(command: &'static str, field: &'static str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        Err(ProtocolError::EmptyField { command, field })
    } else {
        Ok(value)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Add { queue, length, data } => write!(f, "ADD {} {} {}", queue, length, data),
            Command::Get { queue } => write!(f, "GET {}", queue),
            Command::Ack { queue, id } => write!(f, "ACK {} {}", queue, id),
            Command::In { queue, id } => write!(f, "IN {} {}", queue, id),
            Command::Save => write!(f, "SAVE"),
        }
    }
}
