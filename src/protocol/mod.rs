//!
//! jsh command protocol
//! --------------------
//! Outbound traffic is one JSON object per command: `{"command": name, "options": [...]}`.
//! Inbound traffic is one or more result objects, each with a `metadata` block
//! (current directory, user, optional error) and a `results` array of rows.
//!
//! The server may deliver several result objects back to back in a single
//! WebSocket message with nothing between them (`...}{...`). `decode_batch`
//! splits such a message into its objects in arrival order. Only the last object
//! answers the command that was just sent; earlier ones are stale framing
//! leftovers and are dropped by `last_reply`, never merged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// A single catalogue command. Built once, encoded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    command: String,
    #[serde(default)]
    options: Vec<String>,
}

impl Command {
    pub fn new<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { command: name.into(), options: options.into_iter().map(Into::into).collect() }
    }

    /// A command with no options.
    pub fn bare(name: impl Into<String>) -> Self { Self { command: name.into(), options: Vec::new() } }

    pub fn name(&self) -> &str { &self.command }
    pub fn options(&self) -> &[String] { &self.options }

    /// Copy-family commands are handled locally and never sent as-is.
    pub fn is_copy(&self) -> bool { self.command.starts_with("cp") }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub currentdir: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Any other server-provided fields (exit code, site, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// The error text, if the server reported a non-empty one.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// One row of a result array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRow(pub Map<String, Value>);

impl ResultRow {
    pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

    pub fn get_str(&self, key: &str) -> Option<&str> { self.0.get(key).and_then(Value::as_str) }

    /// Field rendered as text: strings as-is, numbers and booleans via their JSON form.
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn message(&self) -> Option<String> { self.get_text("message") }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub results: Vec<ResultRow>,
}

impl ResultBatch {
    pub fn error_message(&self) -> Option<&str> { self.metadata.error_message() }

    /// Result messages joined by newlines, the plain-text rendering of a reply.
    pub fn messages(&self) -> String {
        self.results.iter().map(|r| r.message().unwrap_or_default()).collect::<Vec<_>>().join("\n")
    }
}

/// Wire form of a command.
pub fn encode(cmd: &Command) -> String {
    serde_json::json!({ "command": cmd.command, "options": cmd.options }).to_string()
}

/// Split one inbound message into its result objects, in arrival order.
///
/// Objects may be concatenated with no delimiter (`}{`) or with whitespace. A
/// message that is empty or does not parse as a sequence of result objects is a
/// framing error; nothing from it should be applied.
pub fn decode_batch(raw: &str) -> AppResult<Vec<ResultBatch>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::protocol("framing", "empty reply"));
    }
    let mut out = Vec::new();
    for item in serde_json::Deserializer::from_str(trimmed).into_iter::<ResultBatch>() {
        let batch = item.map_err(|e| AppError::protocol("framing", format!("malformed reply: {}", e)))?;
        out.push(batch);
    }
    Ok(out)
}

/// The authoritative answer of a decoded message: its last object.
pub fn last_reply(mut batches: Vec<ResultBatch>) -> AppResult<ResultBatch> {
    batches.pop().ok_or_else(|| AppError::protocol("framing", "reply carried no result objects"))
}
