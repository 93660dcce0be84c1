//! Client-side session bootstrap.
//!
//! A client locates the socket reserved for its own effective uid and
//! refuses to connect unless the file's type, mode, and owner all
//! match the contract established by the privileged parent.  The
//! verification is the actual safety net against the window between a
//! server binding a socket and the parent fixing it up, and against
//! decoy files planted by other local users.

use crate::{Config, Error, PROTOCOL_VERSION, SOCKET_MODE};
use nix::unistd::{Uid, User};
use std::{
    fs, io,
    os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt},
    path::Path,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

/// A verified client connection to the caller's own socket server.
#[derive(Debug)]
pub struct Session {
    uid: u32,
    stream: UnixStream,
}

impl Session {
    /// Connect to the socket reserved for the caller's effective uid.
    ///
    /// The socket path is derived from the caller's own identity,
    /// never from anything another party supplies.  The socket's
    /// metadata is verified before the OS-level connect is attempted;
    /// a failed verification may simply mean the parent has not fixed
    /// the socket up yet, so callers may re-check after a backoff.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let uid = Uid::effective();
        let path = config.socket_path(uid.as_raw());

        let user = User::from_uid(uid)?.ok_or_else(|| Error::UidNotFound(uid.as_raw()))?;

        verify_socket(&path, uid.as_raw(), user.gid.as_raw())?;

        let mut stream = UnixStream::connect(&path).await?;

        let version = stream.read_u8().await?;
        if version != PROTOCOL_VERSION {
            return Err(Error::VersionMismatch(version, PROTOCOL_VERSION));
        }
        stream.write_u8(PROTOCOL_VERSION).await?;

        Ok(Self {
            uid: uid.as_raw(),
            stream,
        })
    }

    /// The uid this session was verified for.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Hand the underlying stream to the application layer.
    pub fn into_stream(self) -> UnixStream {
        self.stream
    }
}

/// Check that the socket at `path` may be trusted by a client with
/// the given uid and primary gid.
///
/// The four checks run in order and each failure is distinct: the
/// path must stat, the permission bits must be exactly `0600`, the
/// file type must be a socket, and the owner must match the caller.
pub fn verify_socket(path: &Path, uid: u32, gid: u32) -> Result<(), Error> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };

    let mode = meta.permissions().mode() & 0o7777;
    if mode != SOCKET_MODE {
        return Err(Error::InvalidPermission(mode));
    }

    if !meta.file_type().is_socket() {
        return Err(Error::NotASocket(path.to_path_buf()));
    }

    if meta.uid() != uid || meta.gid() != gid {
        return Err(Error::OwnershipMismatch(meta.uid(), meta.gid()));
    }

    Ok(())
}
