use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use x509_parser::pem::parse_x509_pem;

use crate::config::Settings;
use crate::error::{AppError, AppResult};

/// The derived token is only used while it has more than this many seconds left.
pub const TOKEN_GRACE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// Long-lived user certificate.
    User,
    /// Short-lived certificate issued by the catalogue.
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub kind: IdentityKind,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub not_after: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_token(&self) -> bool { self.kind == IdentityKind::Token }
}

/// Read a PEM certificate and return its not-after as unix seconds.
pub fn read_not_after(path: &Path) -> AppResult<i64> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::identity("cert_unreadable", format!("{}: {}", path.display(), e)))?;
    let (_, pem) = parse_x509_pem(&bytes)
        .map_err(|e| AppError::identity("cert_not_pem", format!("{}: {}", path.display(), e)))?;
    let x509 = pem
        .parse_x509()
        .map_err(|e| AppError::identity("cert_not_x509", format!("{}: {}", path.display(), e)))?;
    Ok(x509.validity().not_after.timestamp())
}

/// Pick the identity for a new connection using the wall clock.
pub fn select_identity(settings: &Settings) -> Identity {
    select_identity_at(settings, Utc::now().timestamp())
}

/// Pick the identity for a new connection as of `now` (unix seconds).
///
/// The derived token wins while its remaining validity exceeds [`TOKEN_GRACE_SECS`].
/// Any failure to read or parse it counts as "not valid" and selects the user identity.
pub fn select_identity_at(settings: &Settings, now: i64) -> Identity {
    match read_not_after(&settings.token_cert) {
        Ok(not_after) => {
            let remaining = not_after - now;
            debug!(target: "jsh::identity", "token cert {} has {}s remaining", settings.token_cert.display(), remaining);
            if remaining > TOKEN_GRACE_SECS {
                return Identity {
                    kind: IdentityKind::Token,
                    cert: settings.token_cert.clone(),
                    key: settings.token_key.clone(),
                    not_after: DateTime::from_timestamp(not_after, 0),
                };
            }
        }
        Err(e) => debug!(target: "jsh::identity", "token cert unusable: {}", e),
    }
    let not_after = read_not_after(&settings.user_cert).ok().and_then(|t| DateTime::from_timestamp(t, 0));
    Identity {
        kind: IdentityKind::User,
        cert: settings.user_cert.clone(),
        key: settings.user_key.clone(),
        not_after,
    }
}
