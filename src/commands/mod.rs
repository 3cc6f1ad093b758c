//! Operator commands and the queue that feeds them to the negotiation task.

mod sequencer;

pub use sequencer::CommandSequencer;

use crate::negotiation::StatusSnapshot;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Offer,
    CreateDataChannel,
    Send(String),
    Restart,
    Status,
    Leave,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("{0} takes no argument")]
    UnexpectedArgument(&'static str),
    #[error("command queue is closed")]
    QueueClosed,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (line, ""),
        };
        let command = match name {
            "offer" => Command::Offer,
            "create-data-channel" | "datachannel" => Command::CreateDataChannel,
            "send" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument("send"));
                }
                return Ok(Command::Send(rest.to_owned()));
            }
            "restart" => Command::Restart,
            "status" => Command::Status,
            "leave" => Command::Leave,
            _ => return Err(CommandError::Unknown(line.to_owned())),
        };
        if !rest.is_empty() {
            return Err(CommandError::UnexpectedArgument(command.name()));
        }
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Offer => "offer",
            Command::CreateDataChannel => "create-data-channel",
            Command::Send(_) => "send",
            Command::Restart => "restart",
            Command::Status => "status",
            Command::Leave => "leave",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Send(text) => write!(f, "send {text}"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    Status(StatusSnapshot),
    /// Session torn down; the sequencer has stopped.
    Left,
    Rejected(String),
}

pub(crate) struct Submission {
    pub line: String,
    pub reply: Option<oneshot::Sender<CommandOutcome>>,
}

/// Cloneable producer side of the command queue.
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<Submission>,
}

impl CommandHandle {
    /// Queues a command and waits for its outcome.
    pub async fn submit(&self, line: impl Into<String>) -> Result<CommandOutcome, CommandError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Submission {
                line: line.into(),
                reply: Some(reply),
            })
            .await
            .map_err(|_| CommandError::QueueClosed)?;
        outcome.await.map_err(|_| CommandError::QueueClosed)
    }

    /// Queues a command from a thread outside the runtime, without waiting
    /// for it to run.
    pub fn submit_blocking(&self, line: impl Into<String>) -> Result<(), CommandError> {
        self.tx
            .blocking_send(Submission {
                line: line.into(),
                reply: None,
            })
            .map_err(|_| CommandError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!(Command::parse("offer"), Ok(Command::Offer));
        assert_eq!(Command::parse("datachannel"), Ok(Command::CreateDataChannel));
        assert_eq!(
            Command::parse("create-data-channel"),
            Ok(Command::CreateDataChannel)
        );
        assert_eq!(Command::parse(" restart "), Ok(Command::Restart));
        assert_eq!(Command::parse("status"), Ok(Command::Status));
        assert_eq!(Command::parse("leave"), Ok(Command::Leave));
    }

    #[test]
    fn send_keeps_the_rest_of_the_line() {
        assert_eq!(
            Command::parse("send hello  there"),
            Ok(Command::Send("hello  there".into()))
        );
        assert_eq!(
            Command::parse("send"),
            Err(CommandError::MissingArgument("send"))
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_lines() {
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert_eq!(
            Command::parse("dance now"),
            Err(CommandError::Unknown("dance now".into()))
        );
        assert_eq!(
            Command::parse("offer twice"),
            Err(CommandError::UnexpectedArgument("offer"))
        );
    }
}
