//!
//! jsh configuration
//! -----------------
//! Settings are resolved once at startup from the environment. Every value has a
//! default so an empty environment yields a usable configuration pointing at the
//! central catalogue. `Settings::from_lookup` accepts any key lookup so tests can
//! supply a map instead of mutating the process environment.

use std::path::PathBuf;

use crate::system_paths;

pub const DEFAULT_HOST: &str = "alice-jcentral.cern.ch";
pub const DEFAULT_WS_PORT: u16 = 8097;
pub const WS_PATH: &str = "/websocket/json";

/// Largest inbound WebSocket message accepted on the control connection.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub ws_port: u16,
    pub ws_path: String,
    /// Directories scanned for trusted CA certificates.
    pub ca_dirs: Vec<PathBuf>,
    pub user_cert: PathBuf,
    pub user_key: PathBuf,
    pub token_cert: PathBuf,
    pub token_key: PathBuf,
    pub tmpdir: PathBuf,
    pub debug: bool,
    /// Dump transfer descriptor lists before handing them to the engine.
    pub xrd_debug: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.is_empty());
        let home = PathBuf::from(get("HOME").unwrap_or_else(|| "~".to_string()));
        let tmpdir = PathBuf::from(get("TMPDIR").unwrap_or_else(|| "/tmp".to_string()));
        let uid = system_paths::current_uid();

        let ca_dir = get("X509_CERT_DIR").map(PathBuf::from).unwrap_or_else(system_paths::grid_ca_dir_default);
        let ws_port = get("JALIEN_WSPORT").and_then(|p| p.parse::<u16>().ok()).unwrap_or(DEFAULT_WS_PORT);

        Settings {
            host: get("JALIEN_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            ws_port,
            ws_path: WS_PATH.to_string(),
            ca_dirs: vec![ca_dir, system_paths::globus_dir(&home)],
            user_cert: get("X509_USER_CERT").map(PathBuf::from).unwrap_or_else(|| system_paths::user_cert_default(&home)),
            user_key: get("X509_USER_KEY").map(PathBuf::from).unwrap_or_else(|| system_paths::user_key_default(&home)),
            token_cert: get("JALIEN_TOKEN_CERT").map(PathBuf::from).unwrap_or_else(|| system_paths::token_cert_default(&tmpdir, uid)),
            token_key: get("JALIEN_TOKEN_KEY").map(PathBuf::from).unwrap_or_else(|| system_paths::token_key_default(&tmpdir, uid)),
            tmpdir,
            debug: get("JALIENPY_DEBUG").is_some(),
            xrd_debug: get("JALIENPY_XRDDEBUG").is_some(),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("wss://{}:{}{}", self.host, self.ws_port, self.ws_path)
    }
}

/// Fixed query parameters appended to every replica URL handed to the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    pub first_connect_max_cnt: u32,
    pub transaction_timeout: u32,
    pub request_timeout: u32,
    pub read_cache_size: u32,
}

impl Default for TransferParams {
    fn default() -> Self {
        Self { first_connect_max_cnt: 2, transaction_timeout: 60, request_timeout: 60, read_cache_size: 0 }
    }
}

impl TransferParams {
    /// Query suffix, starting with `&`, appended after the `authz` parameter.
    pub fn query_suffix(&self) -> String {
        format!(
            "&FirstConnectMaxCnt={}&TransactionTimeout={}&RequestTimeout={}&ReadCacheSize={}",
            self.first_connect_max_cnt, self.transaction_timeout, self.request_timeout, self.read_cache_size
        )
    }
}
