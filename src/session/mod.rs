//!
//! jsh session manager
//! -------------------
//! A `Session` owns the one control connection and everything learned over it:
//! the current catalogue directory, the user name and the command catalogue.
//!
//! Lifecycle: `Closed -> Connecting -> Authenticated -> Ready -> Busy -> Ready ... -> Closed`.
//! The transport handed to `establish` has already completed its TLS handshake,
//! so the session starts in `Authenticated`. If that handshake used the long-lived
//! user certificate, a `token` command is sent first and its reply is written to
//! the token store so the next connection can use the derived identity. The
//! command catalogue is then fetched once, unless the caller already has it.
//!
//! Every command is one send followed by one receive. Copy-family commands never
//! go on the wire: they are handed to the transfer orchestrator, which issues its
//! own `access` and `commit` exchanges through this same session.

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, IdentityKind, TokenStore};
use crate::protocol::{decode_batch, encode, last_reply, Command, ResultBatch};
use crate::transfer::{self, CopyContext, CopyReport, TransferEngine};

mod transport;
pub mod tls;

pub use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connecting,
    Authenticated,
    Ready,
    Busy,
}

/// Valid command names plus the raw `commandlist` text, fetched once per process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalogue {
    pub raw: String,
    pub commands: Vec<String>,
}

impl Catalogue {
    pub fn from_text(raw: &str) -> Self {
        Self { raw: raw.to_string(), commands: raw.split_whitespace().map(str::to_string).collect() }
    }

    pub fn contains(&self, name: &str) -> bool { self.commands.iter().any(|c| c == name) }
}

/// What a command produced: a catalogue reply, or the report of a local copy.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Batch(ResultBatch),
    Copy(CopyReport),
}

pub struct Session<T: Transport> {
    transport: T,
    state: SessionState,
    identity_kind: IdentityKind,
    current_dir: String,
    user: String,
    catalogue: Option<Catalogue>,
}

impl<T: Transport> Session<T> {
    /// Run the open sequence on an already connected transport.
    ///
    /// `cached` is the catalogue from an earlier connection of this process; when
    /// present, `commandlist` is not sent again.
    pub async fn establish(
        transport: T,
        identity: &Identity,
        tokens: &TokenStore,
        cached: Option<Catalogue>,
    ) -> AppResult<Self> {
        let mut session = Session {
            transport,
            state: SessionState::Connecting,
            identity_kind: identity.kind,
            current_dir: String::new(),
            user: String::new(),
            catalogue: cached,
        };
        session.state = SessionState::Authenticated;
        info!(target: "jsh::session", "authenticated with {:?} identity {}", identity.kind, identity.cert.display());

        if identity.kind == IdentityKind::User {
            session.refresh_token(tokens).await?;
        }

        if session.catalogue.is_none() {
            session.fetch_catalogue().await?;
        }

        session.state = SessionState::Ready;
        Ok(session)
    }

    /// An unusable `commandlist` reply leaves the catalogue empty; the next
    /// connection asks again.
    async fn fetch_catalogue(&mut self) -> AppResult<()> {
        match self.exchange(&Command::bare("commandlist")).await {
            Ok(reply) => {
                let text = reply.results.first().and_then(|r| r.message()).unwrap_or_default();
                let catalogue = Catalogue::from_text(&text);
                debug!(target: "jsh::session", "cached {} commands", catalogue.commands.len());
                self.catalogue = Some(catalogue);
                Ok(())
            }
            Err(e) if e.is_session_fatal() => Err(e),
            Err(e) => {
                warn!(target: "jsh::session", "command list unavailable: {}", e);
                Ok(())
            }
        }
    }

    async fn refresh_token(&mut self, tokens: &TokenStore) -> AppResult<()> {
        match self.exchange(&Command::bare("token")).await {
            Ok(reply) => {
                if let Err(e) = tokens.ingest(&reply) {
                    warn!(target: "jsh::session", "could not store derived token: {}", e);
                }
                Ok(())
            }
            Err(e) if e.is_session_fatal() => Err(e),
            Err(e) => {
                warn!(target: "jsh::session", "token request failed: {}", e);
                Ok(())
            }
        }
    }

    pub fn state(&self) -> SessionState { self.state }
    pub fn identity_kind(&self) -> IdentityKind { self.identity_kind }
    pub fn current_dir(&self) -> &str { &self.current_dir }
    pub fn user(&self) -> &str { &self.user }
    pub fn catalogue(&self) -> Option<&Catalogue> { self.catalogue.as_ref() }

    /// Hand the catalogue over for the next connection of this process.
    pub fn take_catalogue(&mut self) -> Option<Catalogue> { self.catalogue.take() }

    /// One request/reply cycle. The last object of the reply is the answer.
    ///
    /// A transport failure closes the session. A framing failure fails only this
    /// exchange and leaves the session usable.
    pub async fn exchange(&mut self, cmd: &Command) -> AppResult<ResultBatch> {
        let resume = match self.state {
            SessionState::Ready | SessionState::Authenticated => self.state,
            SessionState::Busy => return Err(AppError::transport("session_busy", "a request is already in flight")),
            SessionState::Closed | SessionState::Connecting => {
                return Err(AppError::transport("session_closed", "session is not connected"))
            }
        };
        self.state = SessionState::Busy;
        let wire = encode(cmd);
        debug!(target: "jsh::session", "send {}", wire);

        if let Err(e) = self.transport.send_text(wire).await {
            self.state = SessionState::Closed;
            return Err(e);
        }
        let raw = match self.transport.recv_text().await {
            Ok(raw) => raw,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };
        self.state = resume;
        debug!(target: "jsh::session", "recv {} bytes", raw.len());

        let batches = decode_batch(&raw)?;
        if batches.len() > 1 {
            debug!(target: "jsh::session", "discarding {} stale result object(s)", batches.len() - 1);
        }
        let reply = last_reply(batches)?;
        self.apply_metadata(&reply);
        Ok(reply)
    }

    fn apply_metadata(&mut self, reply: &ResultBatch) {
        if !reply.metadata.currentdir.is_empty() {
            self.current_dir = reply.metadata.currentdir.clone();
        }
        if !reply.metadata.user.is_empty() {
            self.user = reply.metadata.user.clone();
        }
    }

    /// Run a user command. Copy-family commands go to the transfer orchestrator.
    pub async fn run(&mut self, cmd: &Command, engine: &dyn TransferEngine, ctx: &CopyContext) -> AppResult<Reply> {
        if cmd.is_copy() {
            let report = transfer::copy(self, cmd.options(), engine, ctx).await?;
            return Ok(Reply::Copy(report));
        }
        self.exchange(cmd).await.map(Reply::Batch)
    }

    pub async fn close(&mut self) -> AppResult<()> {
        if self.state == SessionState::Closed { return Ok(()); }
        self.state = SessionState::Closed;
        self.transport.close().await
    }
}
