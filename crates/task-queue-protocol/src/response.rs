use std::fmt;
use task_queue_core::{LeasedTask, TaskId};

/// A reply line sent back for each command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Id of a newly added task
    Added(TaskId),
    /// A task leased by `GET`
    Task(LeasedTask),
    /// `GET` found nothing to lease
    None,
    Yes,
    No,
    Ok,
    Error,
}

impl Response {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Response::Yes
        } else {
            Response::No
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error)
    }
}

impl From<Option<LeasedTask>> for Response {
    fn from(task: Option<LeasedTask>) -> Self {
        task.map(Response::Task).unwrap_or(Response::None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Added(id) => write!(f, "{}", id),
            Response::Task(task) => write!(f, "{}", task),
            Response::None => f.write_str("NONE"),
            Response::Yes => f.write_str("YES"),
            Response::No => f.write_str("NO"),
            Response::Ok => f.write_str("OK"),
            Response::Error => f.write_str("ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_response_text() {
        let id = Uuid::new_v4();
        assert_eq!(Response::Added(id).to_string(), id.to_string());
        assert_eq!(Response::None.to_string(), "NONE");
        assert_eq!(Response::from_bool(true).to_string(), "YES");
        assert_eq!(Response::from_bool(false).to_string(), "NO");
        assert_eq!(Response::Ok.to_string(), "OK");
        assert_eq!(Response::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_task_response() {
        let id = Uuid::new_v4();
        let task = LeasedTask {
            id,
            length: 5,
            data: "hello".to_string(),
        };
        assert_eq!(Response::from(Some(task)).to_string(), format!("{} 5 hello", id));
        assert_eq!(Response::from(None), Response::None);
    }
}
