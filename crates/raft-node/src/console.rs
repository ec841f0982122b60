//! # console
//!
//! why: give an operator a way to write to and inspect a running node
//! relations: parses stdin lines for main.rs; writes go through Node::apply, reads hit the local MemoryStore
//! what: ConsoleCommand, execute, run

use crate::gateway::Transport;
use crate::node::Node;
use crate::store::MemoryStore;
use anyhow::{anyhow, bail, Result};
use raft_core::Command;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

pub const HELP: &str = "\
commands:
  set <key> <value>   replicate a write (leader only)
  delete <key>        replicate a delete (leader only)
  get <key>           read from the local store
  dump                show node state and log
  help                show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Set { key: String, value: String },
    Delete { key: String },
    Get { key: String },
    Dump,
    Help,
}

impl ConsoleCommand {
    /// Parse one line; the verb is case-insensitive, the value may contain spaces
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        if verb.is_empty() {
            bail!("empty command");
        }

        let args: Vec<&str> = rest.splitn(2, char::is_whitespace).filter(|s| !s.is_empty()).collect();
        match (verb.to_lowercase().as_str(), args.as_slice()) {
            ("set", [key, value]) => Ok(Self::Set {
                key: key.to_string(),
                value: value.trim().to_string(),
            }),
            ("set", _) => Err(anyhow!("usage: set <key> <value>")),
            ("delete" | "del", [key]) => Ok(Self::Delete { key: key.to_string() }),
            ("delete" | "del", _) => Err(anyhow!("usage: delete <key>")),
            ("get", [key]) => Ok(Self::Get { key: key.to_string() }),
            ("get", _) => Err(anyhow!("usage: get <key>")),
            ("dump", []) => Ok(Self::Dump),
            ("help" | "?", []) => Ok(Self::Help),
            (other, _) => Err(anyhow!("unknown command '{other}', try 'help'")),
        }
    }
}

/// Carry out a command and describe the outcome
pub async fn execute<T: Transport>(node: &Node<T>, store: &MemoryStore, command: ConsoleCommand) -> String {
    let write = match command {
        ConsoleCommand::Set { key, value } => Command::set(key, value),
        ConsoleCommand::Delete { key } => Command::delete(key),
        ConsoleCommand::Get { key } => {
            return match store.get(&key) {
                Some(value) => String::from_utf8_lossy(&value).into_owned(),
                None => "(nil)".to_string(),
            }
        }
        ConsoleCommand::Dump => return node.dump(),
        ConsoleCommand::Help => return HELP.to_string(),
    };
    match node.apply(write).await {
        Ok(()) => "ok".to_string(),
        Err(err) => format!("error: {err}"),
    }
}

/// Read commands from `input` until it closes
pub async fn run<T, R>(node: Node<T>, store: &MemoryStore, input: R) -> Result<()>
where
    T: Transport,
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match ConsoleCommand::parse(&line) {
            Ok(command) => println!("{}", execute(&node, store, command).await),
            Err(err) => println!("error: {err}"),
        }
    }
    Ok(())
}
