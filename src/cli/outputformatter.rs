use serde_json::{json, Map, Value};

use crate::protocol::ResultBatch;
use crate::session::Reply;
use crate::transfer::{CopyReport, Direction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// One line per result row: its `message`, empty when it has none.
    #[default]
    Plain,
    /// Pretty JSON without the metadata block.
    Json,
    /// Pretty JSON including metadata.
    JsonAll,
}

/// Text written to stdout for a reply, and the error text for stderr if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub out: String,
    pub err: Option<String>,
}

// Recursively rebuild objects with their keys in order.
fn sorted(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), sorted(&map[k.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn pretty(v: &Value) -> String {
    let s = sorted(v);
    serde_json::to_string_pretty(&s).unwrap_or_else(|_| s.to_string())
}

pub fn render_batch(batch: &ResultBatch, mode: OutputMode) -> Rendered {
    let err = batch.error_message().map(str::to_string);
    match mode {
        OutputMode::Plain => Rendered { out: batch.messages(), err },
        OutputMode::Json => {
            let v = json!({ "results": batch.results });
            Rendered { out: pretty(&v), err }
        }
        OutputMode::JsonAll => {
            let v = serde_json::to_value(batch).unwrap_or(Value::Null);
            Rendered { out: pretty(&v), err: None }
        }
    }
}

fn copy_summary(report: &CopyReport) -> String {
    match report.direction {
        Direction::Download => format!("{} -> {}", report.remote, report.local.display()),
        Direction::Upload => format!(
            "{} -> {} ({}/{} replicas committed)",
            report.local.display(),
            report.remote,
            report.committed.len(),
            report.replicas
        ),
    }
}

pub fn render_copy(report: &CopyReport, mode: OutputMode) -> Rendered {
    let err = if report.is_complete() {
        None
    } else {
        Some(format!("only {} of {} replicas were committed", report.committed.len(), report.replicas))
    };
    match mode {
        OutputMode::Plain => Rendered { out: copy_summary(report), err },
        OutputMode::Json | OutputMode::JsonAll => {
            let jobs: Vec<Value> = report
                .outcomes
                .iter()
                .map(|o| json!({ "id": o.id, "status": o.status.kind, "message": o.status.message }))
                .collect();
            let direction = match report.direction { Direction::Download => "download", Direction::Upload => "upload" };
            let v = json!({
                "direction": direction,
                "remote": report.remote,
                "local": report.local.display().to_string(),
                "replicas": report.replicas,
                "committed": report.committed.len(),
                "jobs": jobs,
            });
            Rendered { out: pretty(&v), err }
        }
    }
}

pub fn render_reply(reply: &Reply, mode: OutputMode) -> Rendered {
    match reply {
        Reply::Batch(b) => render_batch(b, mode),
        Reply::Copy(r) => render_copy(r, mode),
    }
}

/// Exit status a one-shot command reports: the server's `exitcode` when given,
/// 1 for an error without one, else 0.
pub fn server_exit_code(reply: &Reply) -> i32 {
    match reply {
        Reply::Batch(b) => {
            let explicit = b.metadata.extra.get("exitcode").and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            });
            match explicit {
                Some(code) => code as i32,
                None if b.error_message().is_some() => 1,
                None => 0,
            }
        }
        Reply::Copy(r) => if r.is_complete() { 0 } else { 1 },
    }
}
