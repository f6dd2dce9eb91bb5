//! The glue between protocol events and command execution.
//!
//! Attaching the bot registers a PRIVMSG callback that recognizes the
//! command prefix, enqueues the command text on the runner, and sends the
//! shaped output back to wherever the request came from.

use lazy_static::lazy_static;
use regex::Regex;
use shrike_proto::IStr;
use tracing::{info, warn};

use crate::client::Client;
use crate::error::ExecError;
use crate::exec::CommandRunner;

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b.*?[a-zA-Z]").expect("static pattern");
}

/// Bot behavior knobs, threaded through construction. Never mutated after
/// startup.
#[derive(Debug, Clone)]
pub struct BotOptions {
    /// Prefix identifying commands, e.g. `!$`. A space separates it from
    /// the command text.
    pub prefix: String,
    /// Whether commands in private queries are honored.
    pub allow_queries: bool,
    /// Maximum output lines per command reply.
    pub max_lines: usize,
}

/// Wire the command-execution behavior onto a client.
pub fn attach(client: &mut Client, runner: CommandRunner, options: BotOptions) {
    let prefix = format!("{} ", options.prefix);
    let max_lines = options.max_lines;
    let allow_queries = options.allow_queries;

    client.on_message(move |handle, event| {
        let Some(command) = event.text.strip_prefix(&prefix) else {
            return;
        };
        if event.is_query && !allow_queries {
            return;
        }

        let target = event
            .channel
            .clone()
            .unwrap_or_else(|| event.sender.nick.clone());
        info!(reply_to = %target, sender = %event.sender.nick, command, "running command");

        let handle = handle.clone();
        let accepted = runner.enqueue(
            command,
            target,
            move |target: IStr, result: Result<Vec<String>, ExecError>| {
                for line in reply_lines(result, max_lines) {
                    if let Err(e) = handle.send(target.as_str(), &line) {
                        warn!(error = %e, "failed to send command output");
                        break;
                    }
                }
            },
        );
        if !accepted {
            warn!("command runner is gone; dropping command");
        }
    });
}

/// Shape raw execution output into reply lines: strip ANSI escapes, drop
/// empty lines, cap the line count, and degrade failures to a status line.
pub fn reply_lines(result: Result<Vec<String>, ExecError>, max_lines: usize) -> Vec<String> {
    let lines = match result {
        Ok(lines) => lines,
        Err(e) => return vec![format!("Command failed: {e}")],
    };

    let cleaned: Vec<String> = lines
        .iter()
        .map(|line| ANSI_ESCAPE.replace_all(line, "").into_owned())
        .filter(|line| !line.is_empty())
        .collect();

    if cleaned.is_empty() {
        return vec!["Command produced no output.".to_owned()];
    }

    let mut reply: Vec<String> = cleaned.iter().take(max_lines).cloned().collect();
    if cleaned.len() > max_lines {
        reply.push(format!("...output trimmed to {max_lines} lines"));
    }
    reply
}
