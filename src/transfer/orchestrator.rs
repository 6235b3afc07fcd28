use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::engine::{
    CopyOptions, JobStatus, TransferDescriptor, TransferEngine, TransferEvent, TransferJob, EVENT_CHANNEL_CAPACITY,
};
use super::manifest::Manifest;
use super::paths::{plan_copy, CopyPlan, Direction};
use crate::config::{Settings, TransferParams};
use crate::error::{AppError, AppResult};
use crate::protocol::{Command, ResultBatch, ResultRow};
use crate::session::{Session, Transport};
use crate::system_paths;

/// Everything a copy needs besides the session and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyContext {
    /// Local working directory used to resolve relative local paths.
    pub cwd: PathBuf,
    /// Where download manifests are written.
    pub tmpdir: PathBuf,
    pub params: TransferParams,
    pub options: CopyOptions,
    pub dump_descriptors: bool,
}

impl CopyContext {
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        Ok(Self {
            cwd: std::env::current_dir()?,
            tmpdir: settings.tmpdir.clone(),
            params: TransferParams::default(),
            options: CopyOptions::default(),
            dump_descriptors: settings.xrd_debug,
        })
    }
}

/// Access grant for one storage replica, from one row of an `access` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaAuthorization {
    pub url: String,
    pub envelope: String,
    /// Only present on read grants.
    pub size: Option<String>,
    pub md5: Option<String>,
}

impl ReplicaAuthorization {
    pub fn from_row(row: &ResultRow) -> AppResult<Self> {
        let url = row
            .get_text("url")
            .ok_or_else(|| AppError::authorization("access_reply", "replica entry without url"))?;
        let envelope = row
            .get_text("envelope")
            .ok_or_else(|| AppError::authorization("access_reply", format!("replica {} without envelope", url)))?;
        Ok(Self { url, envelope, size: row.get_text("size"), md5: row.get_text("md5") })
    }

    /// Replica URL carrying its envelope and the fixed transfer parameters.
    pub fn decorated_url(&self, params: &TransferParams) -> String {
        format!("{}?authz={}{}", self.url, self.envelope, params.query_suffix())
    }
}

/// Turn an `access` reply into one grant per replica. An empty result list aborts
/// the copy, with the server's error text when it sent one.
pub fn authorizations_from_reply(reply: &ResultBatch) -> AppResult<Vec<ReplicaAuthorization>> {
    if reply.results.is_empty() {
        let msg = reply.error_message().unwrap_or("catalogue returned no replicas");
        return Err(AppError::authorization("access_denied", msg));
    }
    reply.results.iter().map(ReplicaAuthorization::from_row).collect()
}

/// Source and destination descriptors for one copy. Jobs are every source paired
/// with every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub sources: Vec<TransferDescriptor>,
    pub targets: Vec<TransferDescriptor>,
    pub manifest: Option<PathBuf>,
}

impl JobPlan {
    pub fn jobs(&self) -> Vec<TransferJob> {
        let mut out = Vec::with_capacity(self.sources.len() * self.targets.len());
        for src in &self.sources {
            for dst in &self.targets {
                out.push(TransferJob { source: src.clone(), target: dst.clone() });
            }
        }
        out
    }
}

/// Write the manifest naming every replica and plan one job: manifest to local file.
///
/// Size and hash are taken from the first replica; replicas are not cross-checked.
pub fn plan_download(plan: &CopyPlan, replicas: &[ReplicaAuthorization], ctx: &CopyContext) -> AppResult<JobPlan> {
    let first = replicas
        .first()
        .ok_or_else(|| AppError::authorization("access_denied", "catalogue returned no replicas"))?;
    let urls = replicas.iter().map(|r| r.decorated_url(&ctx.params)).collect();
    let target = plan.local.display().to_string();
    let manifest_path = system_paths::manifest_path(&ctx.tmpdir, &plan.remote);
    Manifest::new(
        target.clone(),
        first.size.clone().unwrap_or_default(),
        first.md5.clone().unwrap_or_default(),
        urls,
    )
    .write_to(&manifest_path)?;
    Ok(JobPlan {
        sources: vec![TransferDescriptor::local(manifest_path.display().to_string())],
        targets: vec![TransferDescriptor::local(target)],
        manifest: Some(manifest_path),
    })
}

/// One local source, one destination per replica. Each destination keeps its
/// envelope as the token to commit.
pub fn plan_upload(plan: &CopyPlan, replicas: &[ReplicaAuthorization], ctx: &CopyContext) -> JobPlan {
    let targets = replicas
        .iter()
        .map(|r| TransferDescriptor { url: r.decorated_url(&ctx.params), token: r.envelope.clone() })
        .collect();
    JobPlan {
        sources: vec![TransferDescriptor::local(plan.local.display().to_string())],
        targets,
        manifest: None,
    }
}

/// Value of the `authz` query parameter of a decorated replica URL.
pub fn authz_from_url(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|p| p.strip_prefix("authz=")).map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub id: usize,
    pub source: String,
    pub target: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub direction: Direction,
    pub remote: String,
    pub local: PathBuf,
    /// Number of replicas the catalogue granted.
    pub replicas: usize,
    pub outcomes: Vec<JobOutcome>,
    /// Tokens the catalogue accepted on `commit` (uploads only).
    pub committed: Vec<String>,
}

impl CopyReport {
    /// False for an upload where some replicas were not committed.
    pub fn is_complete(&self) -> bool {
        match self.direction {
            Direction::Download => !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.status.is_ok()),
            Direction::Upload => self.committed.len() == self.replicas,
        }
    }
}

/// Consumer side of the engine's event stream.
struct CopySink<'a> {
    direction: Direction,
    jobs: &'a [TransferJob],
    manifest: Option<&'a Path>,
    begun: HashMap<usize, (String, String)>,
    outcomes: Vec<JobOutcome>,
    commit_tokens: Vec<String>,
}

impl<'a> CopySink<'a> {
    fn new(direction: Direction, jobs: &'a [TransferJob], manifest: Option<&'a Path>) -> Self {
        Self { direction, jobs, manifest, begun: HashMap::new(), outcomes: Vec::new(), commit_tokens: Vec::new() }
    }

    fn on_event(&mut self, ev: TransferEvent) {
        match ev {
            TransferEvent::Begin { id, total, source, target } => {
                info!(target: "jsh::transfer", "jobID: {}/{}", id, total);
                debug!(target: "jsh::transfer", "source: {} target: {}", source, target);
                self.begun.insert(id, (source, target));
            }
            TransferEvent::Update { id, processed, total } => {
                debug!(target: "jsh::transfer", "jobID: {} ; processed: {}, total: {}", id, processed, total);
            }
            TransferEvent::End { id, status } => self.on_end(id, status),
        }
    }

    fn on_end(&mut self, id: usize, status: JobStatus) {
        let job = id.checked_sub(1).and_then(|i| self.jobs.get(i));
        let (source, target) = self
            .begun
            .remove(&id)
            .or_else(|| job.map(|j| (j.source.url.clone(), j.target.url.clone())))
            .unwrap_or_default();
        if status.is_ok() {
            info!(target: "jsh::transfer", "STATUS: OK ; MESSAGE: {}", status.message);
            match self.direction {
                Direction::Download => self.remove_manifest(&source),
                Direction::Upload => {
                    let token = authz_from_url(&target)
                        .or_else(|| job.map(|j| j.target.token.clone()).filter(|t| !t.is_empty()));
                    match token {
                        Some(t) => self.commit_tokens.push(t),
                        None => warn!(target: "jsh::transfer", "job {} succeeded but carries no authz token", id),
                    }
                }
            }
        } else {
            warn!(
                target: "jsh::transfer",
                "STATUS: {:?} ; ERRNO: {} ; CODE: {} ; MESSAGE: {}",
                status.kind, status.errno, status.code, status.message
            );
        }
        self.outcomes.push(JobOutcome { id, source, target, status });
    }

    /// Remove the temporary manifest once its download is done. Only the manifest
    /// written for this copy is ever deleted.
    fn remove_manifest(&self, source: &str) {
        let Some(manifest) = self.manifest else { return };
        if Path::new(source) != manifest { return; }
        if let Err(e) = fs::remove_file(manifest) {
            warn!(target: "jsh::transfer", "could not remove {}: {}", manifest.display(), e);
        }
    }
}

async fn commit_tokens<T: Transport>(session: &mut Session<T>, tokens: &[String]) -> AppResult<Vec<String>> {
    let mut committed = Vec::with_capacity(tokens.len());
    for token in tokens {
        match session.exchange(&Command::new("commit", [token.as_str()])).await {
            Ok(reply) => {
                debug!(target: "jsh::transfer", "commit reply: {}", serde_json::to_string(&reply).unwrap_or_default());
                match reply.error_message() {
                    Some(err) => warn!(target: "jsh::transfer", "commit rejected: {}", err),
                    None => committed.push(token.clone()),
                }
            }
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => warn!(target: "jsh::transfer", "commit reply unusable: {}", e),
        }
    }
    Ok(committed)
}

/// Run a copy command: authorize, transfer, and for uploads commit the replicas
/// that were written.
///
/// A partially successful upload returns `Ok`; compare `committed` with
/// `replicas` on the report to detect it.
pub async fn copy<T: Transport>(
    session: &mut Session<T>,
    args: &[String],
    engine: &dyn TransferEngine,
    ctx: &CopyContext,
) -> AppResult<CopyReport> {
    let plan = plan_copy(args, &ctx.cwd, session.current_dir())?;
    if plan.direction == Direction::Upload && !plan.local.is_file() {
        return Err(AppError::user("copy_args", format!("local file {} does not exist", plan.local.display())));
    }

    let mode = match plan.direction { Direction::Download => "read", Direction::Upload => "write" };
    let reply = session.exchange(&Command::new("access", [mode, plan.remote.as_str()])).await?;
    let replicas = authorizations_from_reply(&reply)?;
    info!(target: "jsh::transfer", "{:?} of {}: {} replica(s) authorized", plan.direction, plan.remote, replicas.len());

    let job_plan = match plan.direction {
        Direction::Download => plan_download(&plan, &replicas, ctx)?,
        Direction::Upload => plan_upload(&plan, &replicas, ctx),
    };
    if ctx.dump_descriptors {
        for d in &job_plan.sources { info!(target: "jsh::transfer", "src: {} token: {}", d.url, d.token); }
        for d in &job_plan.targets { info!(target: "jsh::transfer", "dst: {} token: {}", d.url, d.token); }
    }

    let jobs = job_plan.jobs();
    let expected = jobs.len();
    let mut sink = CopySink::new(plan.direction, &jobs, job_plan.manifest.as_deref());
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let engine_run = engine.run(jobs.clone(), &ctx.options, tx);
    let drain = async {
        while sink.outcomes.len() < expected {
            match rx.recv().await {
                Some(ev) => sink.on_event(ev),
                None => break,
            }
        }
    };
    let (engine_result, ()) = tokio::join!(engine_run, drain);
    if let Err(e) = engine_result {
        warn!(target: "jsh::transfer", "transfer engine failed: {}", e);
        if sink.outcomes.is_empty() { return Err(e); }
    }
    let CopySink { outcomes, commit_tokens: tokens, .. } = sink;

    let mut report = CopyReport {
        direction: plan.direction,
        remote: plan.remote.clone(),
        local: plan.local.clone(),
        replicas: replicas.len(),
        outcomes,
        committed: Vec::new(),
    };

    match plan.direction {
        Direction::Download => {
            if let Some(failed) = report.outcomes.iter().find(|o| !o.status.is_ok()) {
                return Err(AppError::transfer("download_failed", format!("{}: {}", plan.remote, failed.status.message)));
            }
            if report.outcomes.is_empty() {
                return Err(AppError::transfer("download_failed", format!("{}: no job result reported", plan.remote)));
            }
        }
        Direction::Upload => {
            if tokens.is_empty() {
                return Err(AppError::transfer("upload_failed", format!("no replica of {} was written", plan.remote)));
            }
            report.committed = commit_tokens(session, &tokens).await?;
            if report.committed.len() < report.replicas {
                warn!(
                    target: "jsh::transfer",
                    "{}: {} of {} replicas committed",
                    plan.remote, report.committed.len(), report.replicas
                );
            }
        }
    }
    Ok(report)
}
