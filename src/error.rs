use derive_more::{Display, From};
use std::{borrow::Cow, io, path::PathBuf, process::ExitStatus};

/// Common errors.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "I/O error: {}", "_0")]
    IoError(io::Error),
    #[display(fmt = "{}", "_0")]
    UnixError(nix::Error),
    #[display(fmt = "Watch error: {}", "_0")]
    WatchError(notify::Error),
    #[display(fmt = "Permission denied, must run as {}", "_0")]
    #[from(ignore)]
    PermissionDenied(Cow<'static, str>),
    #[display(fmt = "Socket server already exists for uid {}", "_0")]
    #[from(ignore)]
    AlreadyExists(u32),
    #[display(fmt = "Not a unix socket: {}", "_0.display()")]
    #[from(ignore)]
    NotASocket(PathBuf),
    #[display(fmt = "Invalid socket name: {}", "_0.display()")]
    #[from(ignore)]
    InvalidSocketName(PathBuf),
    #[display(fmt = "Socket not found: {}", "_0.display()")]
    #[from(ignore)]
    NotFound(PathBuf),
    #[display(fmt = "Unix socket has invalid permissions: {:o}", "_0")]
    #[from(ignore)]
    InvalidPermission(u32),
    #[display(fmt = "Unix socket has invalid owner: uid {}, gid {}", "_0", "_1")]
    #[from(ignore)]
    OwnershipMismatch(u32, u32),
    #[display(fmt = "User '{}' for the unprivileged daemon not found", "_0")]
    #[from(ignore)]
    UserNotFound(Cow<'static, str>),
    #[display(fmt = "Uid {} not found in the user database", "_0")]
    #[from(ignore)]
    UidNotFound(u32),
    #[display(fmt = "Protocol version mismatch: {} != {}", "_0", "_1")]
    #[from(ignore)]
    VersionMismatch(u8, u8),
    #[display(fmt = "Socket daemon exited with {}", "_0")]
    #[from(ignore)]
    DaemonFailed(ExitStatus),
}

impl std::error::Error for Error {}
