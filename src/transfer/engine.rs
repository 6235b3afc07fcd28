use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::AppResult;

/// Capacity of the progress channel between an engine and its consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One end of a transfer: a path or storage URL, plus the token to commit it with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub url: String,
    pub token: String,
}

impl TransferDescriptor {
    pub fn local(path: impl Into<String>) -> Self { Self { url: path.into(), token: String::new() } }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub source: TransferDescriptor,
    pub target: TransferDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    pub overwrite: bool,
    pub make_dirs: bool,
    /// Persist on successful close: a target not closed cleanly is removed.
    pub posc: bool,
    pub max_sources: u32,
    pub parallel_chunks: u32,
    pub chunk_size: u64,
    pub checksum: String,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            make_dirs: true,
            posc: true,
            max_sources: 1,
            parallel_chunks: 1,
            chunk_size: 4_194_304,
            checksum: "md5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusKind {
    Ok,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub kind: JobStatusKind,
    pub message: String,
    pub errno: i32,
    pub code: i32,
}

impl JobStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { kind: JobStatusKind::Ok, message: message.into(), errno: 0, code: 0 }
    }

    pub fn error(message: impl Into<String>, errno: i32, code: i32) -> Self {
        Self { kind: JobStatusKind::Error, message: message.into(), errno, code }
    }

    pub fn fatal(message: impl Into<String>, errno: i32, code: i32) -> Self {
        Self { kind: JobStatusKind::Fatal, message: message.into(), errno, code }
    }

    pub fn is_ok(&self) -> bool { self.kind == JobStatusKind::Ok }
}

/// Progress reported by a transfer engine. Job ids are 1-based in job order and
/// every job produces exactly one `End`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Begin { id: usize, total: usize, source: String, target: String },
    Update { id: usize, processed: u64, total: u64 },
    End { id: usize, status: JobStatus },
}

/// The data plane. Runs every job, emitting events on `events`, and returns once
/// all jobs have ended. Dropping `events` on return closes the stream.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    async fn run(&self, jobs: Vec<TransferJob>, options: &CopyOptions, events: mpsc::Sender<TransferEvent>) -> AppResult<()>;
}

/// Delegates each job to the `xrdcp` command-line client, one after another.
#[derive(Debug, Clone)]
pub struct XrdcpEngine {
    program: PathBuf,
}

impl Default for XrdcpEngine {
    fn default() -> Self { Self { program: PathBuf::from("xrdcp") } }
}

impl XrdcpEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self { Self { program: program.into() } }

    /// Command-line arguments for one job.
    pub fn args(job: &TransferJob, options: &CopyOptions) -> Vec<String> {
        let mut args = Vec::new();
        if options.overwrite { args.push("--force".to_string()); }
        if options.posc { args.push("--posc".to_string()); }
        if options.make_dirs { args.push("--path".to_string()); }
        args.push("--sources".to_string());
        args.push(options.max_sources.to_string());
        args.push("--cksum".to_string());
        args.push(options.checksum.clone());
        args.push(job.source.url.clone());
        args.push(job.target.url.clone());
        args
    }

    async fn run_one(&self, job: &TransferJob, options: &CopyOptions) -> JobStatus {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(Self::args(job, options))
            .env("XRD_CPCHUNKSIZE", options.chunk_size.to_string())
            .env("XRD_CPPARALLELCHUNKS", options.parallel_chunks.to_string())
            // manifests are local .meta4 files
            .env("XRD_LOCALMETALINKFILE", "1")
            .stdin(Stdio::null());
        match cmd.status().await {
            Ok(status) if status.success() => JobStatus::ok(""),
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                JobStatus::error(format!("{} exited with status {}", self.program.display(), code), 0, code)
            }
            Err(e) => JobStatus::fatal(
                format!("failed to start {}: {}", self.program.display(), e),
                e.raw_os_error().unwrap_or(0),
                -1,
            ),
        }
    }
}

#[async_trait]
impl TransferEngine for XrdcpEngine {
    async fn run(&self, jobs: Vec<TransferJob>, options: &CopyOptions, events: mpsc::Sender<TransferEvent>) -> AppResult<()> {
        let total = jobs.len();
        for (idx, job) in jobs.iter().enumerate() {
            let id = idx + 1;
            let _ = events
                .send(TransferEvent::Begin { id, total, source: job.source.url.clone(), target: job.target.url.clone() })
                .await;
            debug!(target: "jsh::xrdcp", "job {}: {:?}", id, Self::args(job, options));
            let status = self.run_one(job, options).await;
            if status.is_ok() {
                if let Ok(meta) = tokio::fs::metadata(&job.target.url).await {
                    let _ = events.send(TransferEvent::Update { id, processed: meta.len(), total: meta.len() }).await;
                }
            }
            info!(target: "jsh::xrdcp", "job {}/{} finished: {:?}", id, total, status.kind);
            let _ = events.send(TransferEvent::End { id, status }).await;
        }
        Ok(())
    }
}
