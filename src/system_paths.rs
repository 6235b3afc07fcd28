use std::path::{Path, PathBuf};

/// Centralized helpers for the well-known credential and scratch locations.
/// Keeps default paths consistent between the settings loader and the copy layer.
#[inline]
pub fn globus_dir(home: &Path) -> PathBuf { home.join(".globus") }

#[inline]
pub fn user_cert_default(home: &Path) -> PathBuf { globus_dir(home).join("usercert.pem") }

#[inline]
pub fn user_key_default(home: &Path) -> PathBuf { globus_dir(home).join("userkey.pem") }

// ---- derived token pair (under the temp area, one per uid) ----
#[inline]
pub fn token_cert_default(tmpdir: &Path, uid: u32) -> PathBuf { tmpdir.join(format!("tokencert_{}.pem", uid)) }

#[inline]
pub fn token_key_default(tmpdir: &Path, uid: u32) -> PathBuf { tmpdir.join(format!("tokenkey_{}.pem", uid)) }

#[inline]
pub fn grid_ca_dir_default() -> PathBuf { PathBuf::from("/etc/grid-security/certificates") }

/// Manifest location for a download of `remote_path`: slashes become underscores,
/// a leading underscore is dropped, and the result lands in the temp area.
pub fn manifest_path(tmpdir: &Path, remote_path: &str) -> PathBuf {
    let flat = remote_path.replace('/', "_");
    let flat = flat.strip_prefix('_').unwrap_or(&flat);
    tmpdir.join(format!("{}.meta4", flat))
}

#[cfg(unix)]
pub fn current_uid() -> u32 { nix::unistd::getuid().as_raw() }

#[cfg(not(unix))]
pub fn current_uid() -> u32 { 0 }
