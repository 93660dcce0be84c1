//! Privilege-separated per-user Unix socket broker.
//!
//! The broker splits into two cooperating processes that only share a
//! directory on the local filesystem.  A privileged parent owns that
//! directory and corrects the ownership and permissions of every
//! socket that appears in it, so that only the user a socket is
//! reserved for can connect to it.  An unprivileged daemon, launched
//! by the parent under a dedicated service account, binds one
//! listening socket per local user inside the directory and accepts
//! client sessions on it.
//!
//! Sockets are named after the decimal uid of the user they belong
//! to.  After the parent has fixed a socket up, its mode is exactly
//! `0600` and its owner matches the uid in the filename.  Clients must
//! not trust a socket before that: [`session::Session::connect`]
//! verifies the file type, mode, and owner of the socket before it
//! attempts the actual connect, which closes the window between a
//! server binding the socket and the parent reacting to it.

pub mod daemon;
mod error;
pub mod parent;
pub mod server;
pub mod session;

pub use error::Error;

use std::{borrow::Cow, path::PathBuf};

/// Name of the unprivileged service account.
pub const USERNAME: &str = "_usockd";

/// Well-known directory that holds the per-user sockets.
pub const SOCKET_DIR: &str = "/run/usockd";

/// Mode of a fixed-up per-user socket.
pub const SOCKET_MODE: u32 = 0o600;

/// Version of the session handshake.
pub const PROTOCOL_VERSION: u8 = 0;

/// General options for the socket broker.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory that holds the per-user sockets.
    pub socket_dir: PathBuf,
    /// Name of the unprivileged service account.
    pub username: Cow<'static, str>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(SOCKET_DIR),
            username: USERNAME.into(),
        }
    }
}

impl Config {
    /// Path of the socket that is reserved for `uid`.
    pub fn socket_path(&self, uid: u32) -> PathBuf {
        self.socket_dir.join(uid.to_string())
    }
}
