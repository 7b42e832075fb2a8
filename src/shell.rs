//! Line-oriented command shell driving the registry.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{registry::Registry, signals::SignalRouter};

const PROMPT: &str = "warden> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Status,
    Start(String),
    Stop(String),
    Restart(String),
    Reload,
    Exit,
}

const USAGE: &str = "\
Commands:
  status            Show the status of every program
  start <name>      Start a program by name
  stop <name>       Stop a running program by name
  restart <name>    Stop, then start a program by name
  reload            Re-read the configuration and reconcile
  help              Show this message
  exit              Stop every program and quit";

/// Parse one input line. `Ok(None)` is a blank line; `Err` carries the
/// message to print before returning to the prompt.
pub fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(None);
    };
    let argument = tokens.next();
    if tokens.next().is_some() {
        return Err(format!("too many arguments for '{head}'"));
    }

    match (head, argument) {
        ("help", None) => Ok(Some(ShellCommand::Help)),
        ("status", None) => Ok(Some(ShellCommand::Status)),
        ("reload", None) => Ok(Some(ShellCommand::Reload)),
        ("exit", None) => Ok(Some(ShellCommand::Exit)),
        ("help" | "status" | "reload" | "exit", Some(_)) => {
            Err(format!("'{head}' takes no argument"))
        }
        ("start", Some(name)) => Ok(Some(ShellCommand::Start(name.to_string()))),
        ("stop", Some(name)) => Ok(Some(ShellCommand::Stop(name.to_string()))),
        ("restart", Some(name)) => Ok(Some(ShellCommand::Restart(name.to_string()))),
        ("start" | "stop" | "restart", None) => Err(format!("usage: {head} <name>")),
        (other, _) => Err(format!("unknown command '{other}'")),
    }
}

pub struct Shell {
    registry: Registry,
    signals: SignalRouter,
}

impl Shell {
    pub fn new(registry: Registry, signals: SignalRouter) -> Self {
        Self { registry, signals }
    }

    /// Read commands until `exit`, end-of-input, or a shutdown signal, then
    /// stop every program. Signal flags are checked between commands.
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{USAGE}");
        prompt()?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("reading command input")? else {
                        break;
                    };
                    if self.dispatch(&line).await {
                        break;
                    }
                    if self.drain_signals().await {
                        break;
                    }
                    prompt()?;
                }
                _ = self.signals.changed() => {
                    if self.drain_signals().await {
                        break;
                    }
                    prompt()?;
                }
            }
        }

        self.registry.stop_all().await;
        Ok(())
    }

    /// Returns true when the shell should exit.
    async fn dispatch(&mut self, line: &str) -> bool {
        let command = match parse_command(line) {
            Ok(None) => return false,
            Ok(Some(command)) => command,
            Err(message) => {
                println!("{message}");
                return false;
            }
        };

        match command {
            ShellCommand::Help => println!("{USAGE}"),
            ShellCommand::Status => {
                for line in self.registry.status() {
                    println!("{line}");
                }
            }
            ShellCommand::Start(name) => report(self.registry.start(&name).await),
            ShellCommand::Stop(name) => report(self.registry.stop(&name).await),
            ShellCommand::Restart(name) => report(self.registry.restart(&name).await),
            ShellCommand::Reload => report(self.registry.reload().await),
            ShellCommand::Exit => return true,
        }
        false
    }

    /// Returns true when a shutdown signal is pending.
    async fn drain_signals(&mut self) -> bool {
        if self.signals.shutdown_requested() {
            println!("shutting down");
            return true;
        }
        if self.signals.take_reload() {
            report(self.registry.reload().await);
        }
        false
    }
}

fn report(result: Result<()>) {
    if let Err(error) = result {
        println!("{error:#}");
    }
}

fn prompt() -> Result<()> {
    print!("{PROMPT}");
    std::io::stdout().flush().context("flushing prompt")
}
