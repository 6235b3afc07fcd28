use super::*;
use crate::config::Settings;
use crate::protocol::decode_batch;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

// 2030-01-01T00:00:00Z
const NOT_AFTER: i64 = 1_893_456_000;

fn write_cert(path: &Path) {
    let mut params = rcgen::CertificateParams::new(vec!["jsh-test".to_string()]).unwrap();
    params.not_after = rcgen::date_time_ymd(2030, 1, 1);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    fs::write(path, cert.pem()).unwrap();
}

fn settings_in(dir: &Path) -> Settings {
    let mut m = HashMap::new();
    m.insert("X509_USER_CERT".to_string(), dir.join("usercert.pem").display().to_string());
    m.insert("X509_USER_KEY".to_string(), dir.join("userkey.pem").display().to_string());
    m.insert("JALIEN_TOKEN_CERT".to_string(), dir.join("tokencert.pem").display().to_string());
    m.insert("JALIEN_TOKEN_KEY".to_string(), dir.join("tokenkey.pem").display().to_string());
    Settings::from_lookup(|k| m.get(k).cloned())
}

#[test]
fn reads_not_after_from_pem() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("c.pem");
    write_cert(&p);
    assert_eq!(read_not_after(&p).unwrap(), NOT_AFTER);
}

#[test]
fn token_with_more_than_grace_left_is_selected() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings_in(tmp.path());
    write_cert(&s.token_cert);
    let id = select_identity_at(&s, NOT_AFTER - TOKEN_GRACE_SECS - 1);
    assert_eq!(id.kind, IdentityKind::Token);
    assert_eq!(id.cert, s.token_cert);
    assert_eq!(id.key, s.token_key);
    assert_eq!(id.not_after.map(|t| t.timestamp()), Some(NOT_AFTER));
}

#[test]
fn token_at_grace_boundary_falls_back_to_user() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings_in(tmp.path());
    write_cert(&s.token_cert);
    let id = select_identity_at(&s, NOT_AFTER - TOKEN_GRACE_SECS);
    assert_eq!(id.kind, IdentityKind::User);
    assert_eq!(id.cert, s.user_cert);
    assert_eq!(id.key, s.user_key);
}

#[test]
fn expired_token_falls_back_to_user() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings_in(tmp.path());
    write_cert(&s.token_cert);
    let id = select_identity_at(&s, NOT_AFTER + 10);
    assert_eq!(id.kind, IdentityKind::User);
}

#[test]
fn missing_token_falls_back_to_user() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings_in(tmp.path());
    let id = select_identity_at(&s, 0);
    assert_eq!(id.kind, IdentityKind::User);
    assert!(id.not_after.is_none());
}

#[test]
fn garbage_token_falls_back_to_user() {
    let tmp = tempfile::tempdir().unwrap();
    let s = settings_in(tmp.path());
    fs::write(&s.token_cert, "-----BEGIN CERTIFICATE-----\nnot base64\n-----END CERTIFICATE-----\n").unwrap();
    let id = select_identity_at(&s, 0);
    assert_eq!(id.kind, IdentityKind::User);
    assert!(read_not_after(&s.token_cert).is_err());
}

fn token_reply() -> crate::protocol::ResultBatch {
    let raw = r#"{"metadata":{"currentdir":"/home/","user":"u"},"results":[{"message":"","tokencert":"CERT-PEM","tokenkey":"KEY-PEM"}]}"#;
    decode_batch(raw).unwrap().pop().unwrap()
}

#[cfg(unix)]
fn mode_of(p: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(p).unwrap().permissions().mode() & 0o777
}

#[cfg(unix)]
#[test]
fn ingest_creates_owner_read_only_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = TokenStore::new(tmp.path().join("tc.pem"), tmp.path().join("tk.pem"));
    store.ingest(&token_reply()).unwrap();
    assert_eq!(fs::read_to_string(&store.cert).unwrap(), "CERT-PEM\n");
    assert_eq!(fs::read_to_string(&store.key).unwrap(), "KEY-PEM\n");
    assert_eq!(mode_of(&store.cert), 0o400);
    assert_eq!(mode_of(&store.key), 0o400);
}

#[cfg(unix)]
#[test]
fn ingest_overwrites_world_readable_and_read_only_files() {
    use std::os::unix::fs::PermissionsExt;
    let tmp = tempfile::tempdir().unwrap();
    let store = TokenStore::new(tmp.path().join("tc.pem"), tmp.path().join("tk.pem"));
    fs::write(&store.cert, "old cert that is much longer than the new one").unwrap();
    fs::set_permissions(&store.cert, fs::Permissions::from_mode(0o644)).unwrap();
    fs::write(&store.key, "old key").unwrap();
    fs::set_permissions(&store.key, fs::Permissions::from_mode(0o400)).unwrap();

    store.ingest(&token_reply()).unwrap();
    assert_eq!(fs::read_to_string(&store.cert).unwrap(), "CERT-PEM\n");
    assert_eq!(fs::read_to_string(&store.key).unwrap(), "KEY-PEM\n");
    assert_eq!(mode_of(&store.cert), 0o400);
    assert_eq!(mode_of(&store.key), 0o400);
}

#[test]
fn ingest_rejects_reply_without_token_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let store = TokenStore::new(tmp.path().join("tc.pem"), tmp.path().join("tk.pem"));
    let raw = r#"{"metadata":{"currentdir":"/","user":"u"},"results":[{"message":"nope"}]}"#;
    let batch = decode_batch(raw).unwrap().pop().unwrap();
    let err = store.ingest(&batch).unwrap_err();
    assert_eq!(err.code_str(), "token_missing");
    assert!(!store.cert.exists());
}

#[cfg(unix)]
#[test]
fn unwritable_key_keeps_previous_pair() {
    let tmp = tempfile::tempdir().unwrap();
    let store = TokenStore::new(tmp.path().join("tc.pem"), tmp.path().join("tk_dir"));
    fs::write(&store.cert, "OLD-CERT").unwrap();
    fs::create_dir(&store.key).unwrap();

    let err = store.ingest(&token_reply()).unwrap_err();
    assert!(matches!(err, crate::error::AppError::Io { .. }));
    assert_eq!(fs::read_to_string(&store.cert).unwrap(), "OLD-CERT");
    assert!(store.key.is_dir());
    assert!(!tmp.path().join("tc.pem.new").exists());
    assert!(!tmp.path().join("tk_dir.new").exists());
}

#[cfg(unix)]
#[test]
fn ingest_leaves_no_staging_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = TokenStore::new(tmp.path().join("tc.pem"), tmp.path().join("tk.pem"));
    store.ingest(&token_reply()).unwrap();
    store.ingest(&token_reply()).unwrap();
    let mut names: Vec<String> =
        fs::read_dir(tmp.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
    names.sort();
    assert_eq!(names, vec!["tc.pem", "tk.pem"]);
}
