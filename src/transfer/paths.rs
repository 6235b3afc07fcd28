use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

use crate::error::{AppError, AppResult};

/// Marks an argument of a copy command as a local path.
pub const LOCAL_PREFIX: &str = "file://";

static LEADING_PARENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.\./+").unwrap());
static LEADING_CURRENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\./+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Grid to local file.
    Download,
    /// Local file to grid replicas.
    Upload,
}

/// A copy request resolved into its remote and local ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub direction: Direction,
    /// Catalogue path sent with the `access` request.
    pub remote: String,
    /// Absolute local path: the download target or the upload source.
    pub local: PathBuf,
}

pub fn is_local(arg: &str) -> bool { arg.starts_with(LOCAL_PREFIX) }

/// Strip the local marker and expand a leading `./` or `../` against `cwd`.
/// Works on the raw string; symlinks are not resolved.
pub fn normalize_local(raw: &str, cwd: &Path) -> String {
    let p = raw.strip_prefix(LOCAL_PREFIX).unwrap_or(raw);
    let parent = cwd.parent().unwrap_or(cwd);
    match p {
        "." => return cwd.display().to_string(),
        ".." => return parent.display().to_string(),
        _ => {}
    }
    if LEADING_PARENT.is_match(p) {
        let prefix = format!("{}/", parent.display());
        return LEADING_PARENT.replace(p, NoExpand(&prefix)).into_owned();
    }
    if LEADING_CURRENT.is_match(p) {
        let prefix = format!("{}/", cwd.display());
        return LEADING_CURRENT.replace(p, NoExpand(&prefix)).into_owned();
    }
    p.to_string()
}

fn file_name_of(path: &str) -> Option<String> {
    Path::new(path).file_name().map(|n| n.to_string_lossy().into_owned())
}

fn join_remote(base: &str, rel: &str) -> String {
    if base.is_empty() { return rel.to_string(); }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Resolve the last two arguments of a copy command (source, destination).
///
/// Exactly one of them must carry the `file://` marker. `cwd` is the local working
/// directory; `remote_cwd` the session's current catalogue directory.
pub fn plan_copy(args: &[String], cwd: &Path, remote_cwd: &str) -> AppResult<CopyPlan> {
    if args.len() < 2 {
        return Err(AppError::user(
            "copy_args",
            "at least 2 arguments are needed: cp [args] src dst, where a local file is prefixed with file://",
        ));
    }
    let src_raw = &args[args.len() - 2];
    let dst_raw = &args[args.len() - 1];
    let src_local = is_local(src_raw);
    let dst_local = is_local(dst_raw);
    if src_local == dst_local {
        return Err(AppError::user("copy_args", "src and dst cannot be of the same type: one must be local and one grid"));
    }

    if dst_local {
        let remote = src_raw.clone();
        let mut local = PathBuf::from(normalize_local(dst_raw, cwd));
        if local.is_relative() { local = cwd.join(local); }
        if local.is_dir() {
            if let Some(name) = file_name_of(&remote) { local = local.join(name); }
        }
        return Ok(CopyPlan { direction: Direction::Download, remote, local });
    }

    let mut local = PathBuf::from(normalize_local(src_raw, cwd));
    if local.is_relative() { local = cwd.join(local); }
    let mut remote = if dst_raw.starts_with('/') { dst_raw.clone() } else { join_remote(remote_cwd, dst_raw) };
    if remote.ends_with('/') {
        if let Some(name) = local.file_name() { remote.push_str(&name.to_string_lossy()); }
    }
    Ok(CopyPlan { direction: Direction::Upload, remote, local })
}
