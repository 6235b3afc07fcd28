use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::protocol::ResultBatch;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// On-disk home of the derived token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStore {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TokenStore {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self { cert: cert.into(), key: key.into() }
    }

    /// Apply a `token` reply: the first result row must carry `tokencert` and `tokenkey`.
    /// Both files are rewritten and left readable by the owner only.
    ///
    /// The pair is replaced as a unit: both contents are staged next to their
    /// targets, the key is moved in first, and if the certificate cannot follow,
    /// the stale certificate is removed so selection falls back to the user identity.
    pub fn ingest(&self, batch: &ResultBatch) -> AppResult<()> {
        let row = batch
            .results
            .first()
            .ok_or_else(|| AppError::protocol("token_missing", "token reply has no result rows"))?;
        let cert = row
            .get_str("tokencert")
            .ok_or_else(|| AppError::protocol("token_missing", "token reply lacks tokencert"))?;
        let key = row
            .get_str("tokenkey")
            .ok_or_else(|| AppError::protocol("token_missing", "token reply lacks tokenkey"))?;
        let cert_stage = staging_path(&self.cert);
        let key_stage = staging_path(&self.key);
        let staged = write_owner_read_only(&cert_stage, cert).and_then(|_| write_owner_read_only(&key_stage, key));
        if let Err(e) = staged {
            discard(&[cert_stage.as_path(), key_stage.as_path()]);
            return Err(e);
        }
        if let Err(e) = fs::rename(&key_stage, &self.key) {
            discard(&[cert_stage.as_path(), key_stage.as_path()]);
            return Err(AppError::io("token_write", format!("{}: {}", self.key.display(), e)));
        }
        if let Err(e) = fs::rename(&cert_stage, &self.cert) {
            discard(&[cert_stage.as_path(), self.cert.as_path()]);
            return Err(AppError::io("token_write", format!("{}: {}", self.cert.display(), e)));
        }
        info!(target: "jsh::identity", "stored derived token in {}", self.cert.display());
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".new");
    path.with_file_name(name)
}

fn discard(paths: &[&Path]) {
    for p in paths {
        if let Err(e) = fs::remove_file(p) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "jsh::identity", "could not remove {}: {}", p.display(), e);
            }
        }
    }
}

/// Loosen an existing file to owner read/write, overwrite it fully, then restrict to 0400.
pub fn write_owner_read_only(path: &Path, content: &str) -> AppResult<()> {
    if path.exists() {
        set_mode(path, 0o600)?;
    }
    let mut text = String::with_capacity(content.len() + 1);
    text.push_str(content);
    text.push('\n');
    create_private(path, text.as_bytes())?;
    set_mode(path, 0o400)
}

#[cfg(unix)]
fn create_private(path: &Path, bytes: &[u8]) -> AppResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| AppError::io("token_write", format!("{}: {}", path.display(), e)))?;
    f.write_all(bytes)
        .and_then(|_| f.sync_all())
        .map_err(|e| AppError::io("token_write", format!("{}: {}", path.display(), e)))
}

#[cfg(not(unix))]
fn create_private(path: &Path, bytes: &[u8]) -> AppResult<()> {
    fs::write(path, bytes).map_err(|e| AppError::io("token_write", format!("{}: {}", path.display(), e)))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> AppResult<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| AppError::io("token_chmod", format!("{}: {}", path.display(), e)))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> AppResult<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
        .map_err(|e| AppError::io("token_chmod", format!("{}: {}", path.display(), e)))
}
