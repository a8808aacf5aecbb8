//! Paths and timing shared by every part of the daemon. A single `Context`
//! is built by the binary and handed to each component that needs it.

use nix::unistd::{geteuid, User};
use std::{path::PathBuf, time::Duration};

/// How long a hold action must stay active before it fires
pub const LONG_PRESS: Duration = Duration::from_secs(1);

/// Gap between the synthesized press and release of a fired hold action
pub const RELEASE_SETTLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct Context {
    /// Application name, used for the virtual device and default paths
    pub name: &'static str,
    /// Directory holding one JSON mapping file per device
    pub config_dir: PathBuf,
    /// Path of the control datagram socket
    pub socket_path: PathBuf,
    pub long_press: Duration,
    pub release_settle: Duration,
}

impl Context {
    /// Build the default context for the effective user
    pub fn new() -> Self {
        let name = env!("CARGO_PKG_NAME");

        let home = match User::from_uid(geteuid()) {
            Ok(Some(user)) => user.dir,
            _ => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
        };

        Context {
            name,
            config_dir: home.join(format!(".{name}")),
            socket_path: PathBuf::from(format!("/tmp/{name}.socket")),
            long_press: LONG_PRESS,
            release_settle: RELEASE_SETTLE,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
