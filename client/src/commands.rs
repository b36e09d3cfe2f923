//! Console command parsing
//!
//! Each typed line maps to at most one outbound event. Mission ids are
//! checked for shape only; the server decides whether they exist.

use shared::{ClientEvent, MissionId};
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  status             request the global status
  start <id>         start a mission
  complete <id>      report a mission as completed
  fail <id>          mark a mission as failed
  check <id>         ask whether a mission is failed
  ack <id>           clear a mission's failure trigger
  reset <id>|all     reset one mission or all missions
  help               show this help
  quit               leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(ClientEvent),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),
    #[error("'{0}' needs a mission id")]
    MissingId(String),
    #[error("'{0}' is not a mission id")]
    InvalidId(String),
    #[error("unexpected argument '{0}'")]
    TrailingArgument(String),
}

/// Parses one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let verb = match words.next() {
        Some(verb) => verb.to_ascii_lowercase(),
        None => return Ok(None),
    };
    let argument = words.next();
    if let Some(extra) = words.next() {
        return Err(CommandError::TrailingArgument(extra.to_string()));
    }

    let command = match verb.as_str() {
        "status" | "s" => no_argument(argument, Command::Send(ClientEvent::RequestGlobalStatus))?,
        "help" | "?" => no_argument(argument, Command::Help)?,
        "quit" | "exit" | "q" => no_argument(argument, Command::Quit)?,
        "start" => Command::Send(ClientEvent::MissionStart(mission_id(&verb, argument)?)),
        "complete" | "done" => {
            Command::Send(ClientEvent::MissionComplete(mission_id(&verb, argument)?))
        }
        "fail" => Command::Send(ClientEvent::MarkFailed(mission_id(&verb, argument)?)),
        "check" => Command::Send(ClientEvent::CheckFailure(mission_id(&verb, argument)?)),
        "ack" | "clear" => {
            Command::Send(ClientEvent::ClearFailureTrigger(mission_id(&verb, argument)?))
        }
        "reset" => match argument {
            Some(target) if target.eq_ignore_ascii_case("all") => {
                Command::Send(ClientEvent::AdminResetAll)
            }
            _ => Command::Send(ClientEvent::AdminResetMission(mission_id(&verb, argument)?)),
        },
        _ => return Err(CommandError::Unknown(verb)),
    };

    Ok(Some(command))
}

fn mission_id(verb: &str, argument: Option<&str>) -> Result<MissionId, CommandError> {
    let argument = argument.ok_or_else(|| CommandError::MissingId(verb.to_string()))?;
    argument
        .parse()
        .map_err(|_| CommandError::InvalidId(argument.to_string()))
}

fn no_argument(argument: Option<&str>, command: Command) -> Result<Command, CommandError> {
    match argument {
        Some(extra) => Err(CommandError::TrailingArgument(extra.to_string())),
        None => Ok(command),
    }
}
