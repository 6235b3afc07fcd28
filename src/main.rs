//!
//! jsh binary
//! ----------
//! Grid catalogue shell. With a command on the command line, runs it once and
//! exits with its status; otherwise starts the interactive shell on one
//! connection until `exit`, end of input or a lost connection.

use std::env;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use jsh::cli::{self, connectivity, LineAction, OutputMode};
use jsh::config::Settings;
use jsh::error::AppResult;
use jsh::identity::{select_identity, TokenStore};
use jsh::session::{Catalogue, Session};
use jsh::transfer::{CopyContext, XrdcpEngine};

/// Exit status after Ctrl-C in one-shot mode.
const INTERRUPTED: i32 = 130;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--json | --json-all] [<command> [options...]]\n\nFlags:\n  --json       print replies as JSON without metadata\n  --json-all   print replies as JSON including metadata\n  -h, --help   show this help\n\nWithout a command an interactive shell is started. In the shell:\n  help | ?            list the catalogue commands; `help <cmd>` asks the server\n  !<cmd>              run <cmd> in the local shell\n  <cmd> | <pipeline>  pipe the output of a catalogue command into a local pipeline\n  exit | quit         leave the shell\n\nCopies: cp [options] <src> <dst>, exactly one of them prefixed with file://\n\nEnvironment: JALIEN_HOST, JALIEN_WSPORT, X509_CERT_DIR, X509_USER_CERT, X509_USER_KEY,\n  JALIEN_TOKEN_CERT, JALIEN_TOKEN_KEY, TMPDIR, JALIENPY_DEBUG, JALIENPY_XRDDEBUG, RUST_LOG"
    );
}

fn init_tracing(settings: &Settings) {
    let level = if settings.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tungstenite=error,tokio_tungstenite=error", level)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

async fn open_session(settings: &Settings, cached: Option<Catalogue>) -> AppResult<Session<connectivity::WsTransport>> {
    let identity = select_identity(settings);
    let tokens = TokenStore::new(&settings.token_cert, &settings.token_key);
    let transport = connectivity::connect(settings, &identity).await?;
    Session::establish(transport, &identity, &tokens, cached).await
}

fn run_once(rt: &tokio::runtime::Runtime, settings: &Settings, mode: OutputMode, words: &[String]) -> i32 {
    let action = cli::parse_words(words);
    let work = async {
        let ctx = CopyContext::from_settings(settings)?;
        let engine = XrdcpEngine::default();
        let mut session = open_session(settings, None).await?;
        let code = cli::perform(&mut session, &action, mode, &engine, &ctx).await;
        let _ = session.close().await;
        code
    };
    rt.block_on(async {
        tokio::select! {
            res = work => match res {
                Ok(code) => code,
                Err(e) => { eprintln!("{}", e); e.exit_code() }
            },
            _ = tokio::signal::ctrl_c() => { eprintln!("Exit"); INTERRUPTED }
        }
    })
}

fn run_shell(rt: &tokio::runtime::Runtime, settings: &Settings, mode: OutputMode) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => { eprintln!("cannot start line editor: {}", e); return 1; }
    };
    let ctx = match CopyContext::from_settings(settings) {
        Ok(c) => c,
        Err(e) => { eprintln!("{}", e); return e.exit_code(); }
    };
    let engine = XrdcpEngine::default();
    let mut session = match rt.block_on(open_session(settings, None)) {
        Ok(s) => s,
        Err(e) => { eprintln!("{}", e); return e.exit_code(); }
    };
    info!(target: "jsh", "connected as {} in {}", session.user(), session.current_dir());

    let code = loop {
        let line = match editor.readline(&cli::prompt(session.current_dir())) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => { println!("Exit"); break 0; }
            Err(e) => { eprintln!("input error: {}", e); break 1; }
        };
        if !line.trim().is_empty() { let _ = editor.add_history_entry(line.as_str()); }
        let action = cli::parse_line(&line);
        match &action {
            LineAction::Empty => continue,
            LineAction::Exit => break 0,
            LineAction::Shell(cmd) => {
                if let Err(e) = cli::run_local_shell(cmd) { eprintln!("{}", e); }
                continue;
            }
            LineAction::Help(_) | LineAction::Run { .. } => {}
        }
        match rt.block_on(cli::perform(&mut session, &action, mode, &engine, &ctx)) {
            Ok(status) => debug!(target: "jsh", "command finished with {}", status),
            Err(e) if e.is_session_fatal() => { eprintln!("{}", e); break e.exit_code(); }
            Err(e) => eprintln!("{}", e),
        }
    };
    let _ = rt.block_on(session.close());
    code
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let program = if args.is_empty() { "jsh".to_string() } else { args.remove(0) };

    let mut mode = OutputMode::Plain;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => { mode = OutputMode::Json; i += 1; continue; }
            "--json-all" => { mode = OutputMode::JsonAll; i += 1; continue; }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            _ => break,
        }
    }
    let command: Vec<String> = args.split_off(i);

    let settings = Settings::from_env();
    init_tracing(&settings);
    debug!(target: "jsh", "endpoint {}", settings.ws_url());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let code = if command.is_empty() {
        run_shell(&rt, &settings, mode)
    } else {
        run_once(&rt, &settings, mode, &command)
    };
    drop(rt);
    if code != 0 { std::process::exit(code); }
    Ok(())
}
