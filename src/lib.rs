pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod system_paths;
pub mod transfer;
