use super::{Command, CommandHandle, CommandOutcome, Submission};
use crate::negotiation::NegotiationError;
use crate::session::{SessionEvent, SessionManager};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

enum Next {
    Command(Option<Submission>),
    Session(SessionEvent),
}

/// Single consumer of operator commands and session events.
///
/// Each command runs to completion before the next submission or session
/// event is taken, so at most one negotiation operation is in flight.
pub struct CommandSequencer {
    manager: SessionManager,
    commands: mpsc::Receiver<Submission>,
}

impl CommandSequencer {
    pub fn new(manager: SessionManager, capacity: usize) -> (CommandHandle, Self) {
        let (tx, commands) = mpsc::channel(capacity.max(1));
        (CommandHandle { tx }, Self { manager, commands })
    }

    /// Processes commands until `leave` or until every handle is dropped.
    pub async fn run(mut self) -> SessionManager {
        loop {
            let next = tokio::select! {
                submission = self.commands.recv() => Next::Command(submission),
                event = self.manager.next_event() => Next::Session(event),
            };
            match next {
                Next::Command(Some(submission)) => {
                    let outcome = self.execute(&submission.line).await;
                    let stop = outcome == CommandOutcome::Left;
                    if let Some(reply) = submission.reply {
                        let _ = reply.send(outcome);
                    }
                    if stop {
                        break;
                    }
                }
                Next::Command(None) => {
                    info!("command queue closed, leaving");
                    self.manager.leave().await;
                    break;
                }
                Next::Session(event) => self.manager.handle_event(event).await,
            }
        }
        self.commands.close();
        debug!("command loop stopped");
        self.manager
    }

    async fn execute(&mut self, line: &str) -> CommandOutcome {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => {
                warn!(command = %line.trim(), error = %err, "ignoring command");
                return CommandOutcome::Rejected(err.to_string());
            }
        };
        info!(command = %command.name(), "processing command");
        match self.dispatch(command).await {
            Ok(outcome) => outcome,
            Err(err) => {
                err.log("command failed");
                CommandOutcome::Rejected(err.to_string())
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<CommandOutcome, NegotiationError> {
        match command {
            Command::Offer => self.manager.negotiator()?.begin_offer().await?,
            Command::CreateDataChannel => self.manager.negotiator()?.create_data_channel().await?,
            Command::Send(text) => self.manager.negotiator()?.send_text(text).await?,
            Command::Restart => {
                self.manager.negotiator()?.restart().await?;
                info!("sent new offer for ICE restart");
            }
            Command::Status => {
                let status = self.manager.negotiator()?.status();
                info!("\n{status}");
                return Ok(CommandOutcome::Status(status));
            }
            Command::Leave => {
                self.manager.leave().await;
                return Ok(CommandOutcome::Left);
            }
        }
        Ok(CommandOutcome::Completed)
    }
}
