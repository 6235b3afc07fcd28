//!
//! jsh command-line surface
//! ------------------------
//! Line parsing for the interactive shell, `help` resolution against the cached
//! command catalogue, local shell escapes and output piping. The binary drives
//! these; nothing here touches the network except `perform`.

pub mod connectivity;
mod outputformatter;

use std::io::Write;
use std::process::{Command as ProcessCommand, Stdio};

use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::protocol::Command;
use crate::session::{Catalogue, Reply, Session, Transport};
use crate::transfer::{CopyContext, TransferEngine};

pub use outputformatter::{render_batch, render_copy, render_reply, server_exit_code, OutputMode, Rendered};

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    Empty,
    Exit,
    /// `!cmd`: run locally through `sh -c`.
    Shell(String),
    /// `help` or `?`, optionally naming a command.
    Help(Option<String>),
    /// A catalogue command, optionally piped into a local pipeline.
    Run { cmd: Command, pipe: Option<String> },
}

/// Interpret already split words (one-shot mode or after line splitting).
pub fn parse_words(words: &[String]) -> LineAction {
    let Some((name, rest)) = words.split_first() else { return LineAction::Empty };
    match name.as_str() {
        "exit" | "quit" => LineAction::Exit,
        "help" | "?" => LineAction::Help(rest.first().cloned()),
        _ => LineAction::Run { cmd: Command::new(name.clone(), rest.iter().cloned()), pipe: None },
    }
}

pub fn parse_line(line: &str) -> LineAction {
    let line = line.trim();
    if line.is_empty() { return LineAction::Empty; }
    if let Some(local) = line.strip_prefix('!') {
        let local = local.trim();
        if local.is_empty() { return LineAction::Empty; }
        return LineAction::Shell(local.to_string());
    }
    let (head, pipe) = match line.split_once('|') {
        Some((h, p)) if !p.trim().is_empty() => (h, Some(p.trim().to_string())),
        Some((h, _)) => (h, None),
        None => (line, None),
    };
    let words: Vec<String> = head.split_whitespace().map(str::to_string).collect();
    match parse_words(&words) {
        LineAction::Run { cmd, .. } => LineAction::Run { cmd, pipe },
        other => other,
    }
}

pub fn prompt(current_dir: &str) -> String { format!("jsh: {} > ", current_dir) }

/// How a `help` line is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelpAnswer {
    /// Print the command list.
    List(String),
    /// Ask the server for `<name> -h`.
    Ask(Command),
}

pub fn resolve_help(topic: Option<&str>, catalogue: Option<&Catalogue>) -> AppResult<HelpAnswer> {
    let listing = || catalogue.map(|c| c.commands.join(" ")).unwrap_or_default();
    match topic {
        None => Ok(HelpAnswer::List(listing())),
        Some(name) if catalogue.map(|c| c.contains(name)).unwrap_or(false) => {
            Ok(HelpAnswer::Ask(Command::new(name, ["-h"])))
        }
        Some(name) => Err(AppError::user("unknown_command", format!("no help for {}; known commands: {}", name, listing()))),
    }
}

/// Run a help or catalogue command and print its output. Returns the exit status
/// the command reported.
pub async fn perform<T: Transport>(
    session: &mut Session<T>,
    action: &LineAction,
    mode: OutputMode,
    engine: &dyn TransferEngine,
    ctx: &CopyContext,
) -> AppResult<i32> {
    let (reply, pipe) = match action {
        LineAction::Help(topic) => match resolve_help(topic.as_deref(), session.catalogue())? {
            HelpAnswer::List(text) => {
                println!("{}", text);
                return Ok(0);
            }
            // help text comes from the server even for locally handled commands
            HelpAnswer::Ask(cmd) => (Reply::Batch(session.exchange(&cmd).await?), None),
        },
        LineAction::Run { cmd, pipe } => (session.run(cmd, engine, ctx).await?, pipe.as_deref()),
        LineAction::Empty | LineAction::Exit | LineAction::Shell(_) => return Ok(0),
    };
    emit(&render_reply(&reply, mode), pipe)?;
    Ok(server_exit_code(&reply))
}

fn emit(rendered: &Rendered, pipe: Option<&str>) -> AppResult<()> {
    match pipe {
        Some(pipeline) => { pipe_to_shell(&rendered.out, pipeline)?; }
        None if !rendered.out.is_empty() => println!("{}", rendered.out),
        None => {}
    }
    if let Some(err) = &rendered.err { eprintln!("{}", err); }
    Ok(())
}

/// Run `cmd` through `sh -c` with the terminal attached.
pub fn run_local_shell(cmd: &str) -> AppResult<i32> {
    debug!(target: "jsh::cli", "local shell: {}", cmd);
    let status = ProcessCommand::new("sh").arg("-c").arg(cmd).status()?;
    Ok(status.code().unwrap_or(-1))
}

/// Feed `text` to `pipeline` on its stdin.
pub fn pipe_to_shell(text: &str, pipeline: &str) -> AppResult<i32> {
    debug!(target: "jsh::cli", "piping {} bytes into {}", text.len(), pipeline);
    let mut child = ProcessCommand::new("sh").arg("-c").arg(pipeline).stdin(Stdio::piped()).spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        // a pipeline that exits early closes its stdin
        if let Err(e) = stdin.write_all(text.as_bytes()).and_then(|_| stdin.write_all(b"\n")) {
            debug!(target: "jsh::cli", "pipeline stopped reading: {}", e);
        }
    }
    let status = child.wait()?;
    Ok(status.code().unwrap_or(-1))
}
