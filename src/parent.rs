//! The privileged parent daemon.
//!
//! The parent is the root of trust: it owns the shared socket
//! directory, watches it for new socket files, and restricts each one
//! to the user encoded in its filename.  It is the only process that
//! ever runs with elevated rights, so it is kept small; everything
//! else happens in the unprivileged daemon that the parent launches
//! under the service account.

use crate::{Config, Error, SOCKET_MODE};
use nix::unistd::{chown, Gid, Uid, User};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::{
    env, fs, io,
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::Path,
    sync::Arc,
};
use tokio::{process::Command, sync::mpsc};
use tokio_util::sync::CancellationToken;
use usockd_log::{debug, error, info};

/// Mode of the shared socket directory: the service account's group
/// may create sockets in it.
const DIR_MODE: u32 = 0o775;

/// The privileged parent daemon.
pub struct Parent {
    /// Credentials of the unprivileged service account.
    user: User,
    shutdown: CancellationToken,
    /// Error that stopped the watch loop, if any.
    fatal: Arc<Mutex<Option<Error>>>,
    /// Keeps the watch backend registered; dropping it stops the
    /// watch.  The mutex only makes the handle shareable.
    _watcher: Mutex<RecommendedWatcher>,
}

impl Parent {
    /// Prepare the shared socket directory and start watching it.
    ///
    /// Fails with `PermissionDenied` before touching the filesystem
    /// when not running as root.
    pub async fn new(config: &Config) -> Result<Self, Error> {
        if !Uid::effective().is_root() {
            return Err(Error::PermissionDenied("root".into()));
        }

        let user = User::from_name(&config.username)?
            .ok_or_else(|| Error::UserNotFound(config.username.clone()))?;

        prepare_socket_dir(&config.socket_dir, user.gid)?;

        // Bridge the watch backend's callback thread into the runtime.
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&config.socket_dir, RecursiveMode::NonRecursive)?;

        let shutdown = CancellationToken::new();
        let fatal = Arc::new(Mutex::new(None));

        tokio::spawn(watch_loop(rx, shutdown.clone(), fatal.clone()));

        info!("parent daemon running"; "dir" => %config.socket_dir.display());

        Ok(Self {
            user,
            shutdown,
            fatal,
            _watcher: Mutex::new(watcher),
        })
    }

    /// Run the unprivileged socket daemon under the service account.
    ///
    /// The credentials are attached at process creation instead of
    /// being dropped inside the child.  The child inherits stdout and
    /// stderr for logging and the verbosity flag is forwarded.
    pub async fn run_daemon(&self, verbose: bool) -> Result<(), Error> {
        let program = env::current_exe()?;

        let mut command = Command::new(program);
        command.arg("-s");
        if verbose {
            command.arg("-v");
        }
        command
            .uid(self.user.uid.as_raw())
            .gid(self.user.gid.as_raw())
            .kill_on_drop(true);

        let status = command.status().await?;
        if !status.success() {
            return Err(Error::DaemonFailed(status));
        }

        Ok(())
    }

    /// Ask the parent to shut down.  Closing twice is a no-op.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the parent has shut down.
    ///
    /// Returns the error that stopped the watch loop, if any, so the
    /// process can exit non-zero after a failed fixup.
    pub async fn wait(&self) -> Result<(), Error> {
        self.shutdown.cancelled().await;

        match self.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Recreate the shared socket directory so that no stale sockets
/// survive a restart.
fn prepare_socket_dir(dir: &Path, gid: Gid) -> Result<(), Error> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    fs::create_dir_all(dir)?;
    chown(dir, Some(Uid::from_raw(0)), Some(gid))?;
    fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))?;

    Ok(())
}

/// React to socket files appearing in the shared directory.
///
/// A failed fixup is fatal: the trust invariant may already be broken
/// for a live socket, so the whole parent shuts down instead of
/// serving an unprotected socket.  Errors from the watch backend
/// itself are transient and only logged.
async fn watch_loop(
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    shutdown: CancellationToken,
    fatal: Arc<Mutex<Option<Error>>>,
) {
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = rx.recv() => match result {
                Some(result) => result,
                None => return,
            },
        };

        match result {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_)) {
                    continue;
                }

                for path in &event.paths {
                    debug!("new socket file"; "path" => %path.display());

                    if let Err(err) = fixup_socket(path) {
                        error!("failed to fix up socket file: {}", err);
                        *fatal.lock() = Some(err);
                        shutdown.cancel();
                        return;
                    }
                }
            }
            Err(err) => error!("socket directory watch error: {}", err),
        }
    }
}

/// Restrict a freshly bound socket to the user encoded in its filename.
///
/// The mode is narrowed to `0600` before the owner changes, so the
/// file is never both wide open and owned by the target user.  A path
/// that has already disappeared again is a benign race with a closing
/// listener and is ignored.
pub fn fixup_socket(path: &Path) -> Result<(), Error> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    if !meta.file_type().is_socket() {
        return Err(Error::NotASocket(path.to_path_buf()));
    }

    let uid = socket_uid(path)?;
    let user = User::from_uid(uid)?.ok_or_else(|| Error::UidNotFound(uid.as_raw()))?;

    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))?;
    chown(path, Some(uid), Some(user.gid))?;

    Ok(())
}

/// Parse the owning uid from the base filename of a socket.
fn socket_uid(path: &Path) -> Result<Uid, Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.parse::<u32>().ok())
        .map(Uid::from_raw)
        .ok_or_else(|| Error::InvalidSocketName(path.to_path_buf()))
}
