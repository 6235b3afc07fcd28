//! End-to-end copy flows against a scripted catalogue and a scripted transfer engine.
//! Covers download through a manifest, partial-success uploads and the commit set.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use jsh::config::TransferParams;
use jsh::error::{AppError, AppResult};
use jsh::identity::{Identity, IdentityKind, TokenStore};
use jsh::protocol::Command;
use jsh::session::{Catalogue, Reply, Session, Transport};
use jsh::transfer::{
    CopyContext, CopyOptions, Direction, JobStatus, TransferDescriptor, TransferEngine, TransferEvent, TransferJob,
};

struct Catalog {
    replies: VecDeque<String>,
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
}

#[async_trait]
impl Transport for Catalog {
    async fn send_text(&mut self, text: String) -> AppResult<()> {
        self.sent.lock().unwrap().push(serde_json::from_str(&text).unwrap());
        Ok(())
    }
    async fn recv_text(&mut self) -> AppResult<String> {
        self.replies.pop_front().ok_or_else(|| AppError::transport("closed", "script exhausted"))
    }
    async fn close(&mut self) -> AppResult<()> { Ok(()) }
}

/// Ends job N with the N-th scripted status and keeps what it was handed.
#[derive(Default)]
struct Engine {
    statuses: Vec<JobStatus>,
    jobs: Mutex<Vec<TransferJob>>,
    manifest_xml: Mutex<Option<String>>,
}

impl Engine {
    fn with(statuses: Vec<JobStatus>) -> Self { Engine { statuses, ..Default::default() } }
}

#[async_trait]
impl TransferEngine for Engine {
    async fn run(&self, jobs: Vec<TransferJob>, _o: &CopyOptions, events: mpsc::Sender<TransferEvent>) -> AppResult<()> {
        let total = jobs.len();
        for (idx, job) in jobs.iter().enumerate() {
            let id = idx + 1;
            if job.source.url.ends_with(".meta4") {
                *self.manifest_xml.lock().unwrap() = std::fs::read_to_string(&job.source.url).ok();
            }
            events
                .send(TransferEvent::Begin { id, total, source: job.source.url.clone(), target: job.target.url.clone() })
                .await
                .unwrap();
            events.send(TransferEvent::Update { id, processed: 5, total: 10 }).await.unwrap();
            let status = self.statuses.get(idx).cloned().unwrap_or_else(|| JobStatus::ok(""));
            events.send(TransferEvent::End { id, status }).await.unwrap();
        }
        *self.jobs.lock().unwrap() = jobs;
        Ok(())
    }
}

async fn session(replies: &[&str], dir: &Path) -> (Session<Catalog>, Arc<Mutex<Vec<serde_json::Value>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = Catalog { replies: replies.iter().map(|s| s.to_string()).collect(), sent: sent.clone() };
    let identity = Identity {
        kind: IdentityKind::Token,
        cert: dir.join("tokencert.pem"),
        key: dir.join("tokenkey.pem"),
        not_after: None,
    };
    let tokens = TokenStore::new(dir.join("tokencert.pem"), dir.join("tokenkey.pem"));
    let s = Session::establish(transport, &identity, &tokens, Some(Catalogue::from_text("ls cp")))
        .await
        .unwrap();
    (s, sent)
}

fn ctx(dir: &Path) -> CopyContext {
    CopyContext {
        cwd: dir.to_path_buf(),
        tmpdir: dir.join("tmp"),
        params: TransferParams::default(),
        options: CopyOptions::default(),
        dump_descriptors: true,
    }
}

const ONE_READ_REPLICA: &str =
    r#"{"metadata":{"currentdir":"/grid/"},"results":[{"url":"root://s1/f","envelope":"e1","size":10,"md5":"abc"}]}"#;
const TWO_WRITE_REPLICAS: &str = r#"{"metadata":{"currentdir":"/grid/"},"results":[
    {"url":"root://s1//grid/up/x.txt","envelope":"e1"},
    {"url":"root://s2//grid/up/x.txt","envelope":"e2"}]}"#;
const COMMIT_OK: &str = r#"{"metadata":{},"results":[{"message":"committed"}]}"#;

#[tokio::test]
async fn download_goes_through_a_single_replica_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut s, sent) = session(&[ONE_READ_REPLICA], tmp.path()).await;
    let engine = Engine::with(vec![JobStatus::ok("")]);

    let reply = s
        .run(&Command::new("cp", ["/grid/f", "file:///local/f"]), &engine, &ctx(tmp.path()))
        .await
        .unwrap();
    let Reply::Copy(report) = reply else { panic!("expected a copy report") };
    assert_eq!(report.direction, Direction::Download);
    assert!(report.is_complete());

    assert_eq!(*sent.lock().unwrap(), vec![serde_json::json!({"command": "access", "options": ["read", "/grid/f"]})]);

    let jobs = engine.jobs.lock().unwrap().clone();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].target, TransferDescriptor { url: "/local/f".into(), token: String::new() });
    assert_eq!(serde_json::to_value(&jobs[0].target).unwrap(), serde_json::json!({"url": "/local/f", "token": ""}));

    let xml = engine.manifest_xml.lock().unwrap().clone().unwrap();
    assert!(xml.contains("<file name=\"/local/f\">"));
    assert!(xml.contains("<size>10</size>"));
    assert!(xml.contains("<hash type=\"md5\">abc</hash>"));
    assert_eq!(xml.matches("<url>").count(), 1);
    assert!(xml.contains("root://s1/f?authz=e1&"));

    assert!(!Path::new(&jobs[0].source.url).exists(), "manifest should be removed after success");
}

#[tokio::test]
async fn failed_download_keeps_manifest_and_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut s, _) = session(&[ONE_READ_REPLICA], tmp.path()).await;
    let engine = Engine::with(vec![JobStatus::error("[ERROR] Server responded with an error", 3011, 54)]);

    let err = s
        .run(&Command::new("cp", ["/grid/f", "file:///local/f"]), &engine, &ctx(tmp.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transfer { .. }));
    let jobs = engine.jobs.lock().unwrap().clone();
    assert!(Path::new(&jobs[0].source.url).exists());
}

#[tokio::test]
async fn partial_upload_commits_only_written_replica() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("x.txt"), "payload").unwrap();
    let (mut s, sent) = session(&[TWO_WRITE_REPLICAS, COMMIT_OK], tmp.path()).await;
    let engine = Engine::with(vec![JobStatus::ok(""), JobStatus::error("no space left", 28, 1)]);

    let reply = s
        .run(&Command::new("cp", ["file://x.txt", "/grid/up/"]), &engine, &ctx(tmp.path()))
        .await
        .unwrap();
    let Reply::Copy(report) = reply else { panic!("expected a copy report") };
    assert_eq!(report.replicas, 2);
    assert_eq!(report.committed, vec!["e1".to_string()]);
    assert!(!report.is_complete());

    let sent = sent.lock().unwrap().clone();
    assert_eq!(sent[0], serde_json::json!({"command": "access", "options": ["write", "/grid/up/x.txt"]}));
    let commits: Vec<_> = sent.iter().filter(|m| m["command"] == "commit").collect();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["options"], serde_json::json!(["e1"]));

    let jobs = engine.jobs.lock().unwrap().clone();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.source.url == tmp.path().join("x.txt").display().to_string()));
}

#[tokio::test]
async fn upload_with_no_written_replica_commits_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("x.txt"), "payload").unwrap();
    let (mut s, sent) = session(&[TWO_WRITE_REPLICAS], tmp.path()).await;
    let engine = Engine::with(vec![JobStatus::error("refused", 111, 1), JobStatus::fatal("refused", 111, 1)]);

    let err = s
        .run(&Command::new("cp", ["file://x.txt", "/grid/up/"]), &engine, &ctx(tmp.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Transfer { .. }));
    assert!(sent.lock().unwrap().iter().all(|m| m["command"] != "commit"));
}

#[tokio::test]
async fn upload_of_missing_local_file_never_reaches_catalogue() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut s, sent) = session(&[], tmp.path()).await;
    let engine = Engine::default();
    let err = s
        .run(&Command::new("cp", ["file://absent.txt", "/grid/up/"]), &engine, &ctx(tmp.path()))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(sent.lock().unwrap().is_empty());
}
