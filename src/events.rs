//! Event definitions for the console event loop.
//!
//! This module defines the `Event` enum fed by the stdin and signal
//! listeners, and the commands a user can type while services run.

use std::str::FromStr;

/// Represents an event in the console's main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A command typed on standard input.
    Command(ConsoleCommand),
    /// Standard input reached end of file.
    InputClosed,
    /// The process received a shutdown signal.
    Shutdown { signal: ShutdownSignal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn label(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

/// A user request relayed to the supervisors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Start one service, or every service when no name is given.
    Start(Option<String>),
    /// Stop one service, or every service when no name is given.
    Stop(Option<String>),
    /// Print the status of every service.
    Status,
    /// Print the buffered output of one service.
    Output(String),
    Help,
    Quit,
}

pub const HELP: &str =
    "commands: start [name] | stop [name] | status | output <name> | help | quit";

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let name = words.next().map(str::to_string);
        if words.next().is_some() {
            return Err(format!("too many arguments: {}", line.trim()));
        }
        match (verb, name) {
            ("start", name) => Ok(ConsoleCommand::Start(name)),
            ("stop", name) => Ok(ConsoleCommand::Stop(name)),
            ("status", None) => Ok(ConsoleCommand::Status),
            ("output", Some(name)) => Ok(ConsoleCommand::Output(name)),
            ("output", None) => Err("output needs a service name".to_string()),
            ("help" | "?", None) => Ok(ConsoleCommand::Help),
            ("quit" | "exit", None) => Ok(ConsoleCommand::Quit),
            _ => Err(format!("unknown command: {} ({})", line.trim(), HELP)),
        }
    }
}
