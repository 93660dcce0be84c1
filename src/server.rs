//! Per-user socket servers.

use crate::{Error, PROTOCOL_VERSION};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};
use tokio_util::sync::CancellationToken;
use usockd_log::{debug, error, info};

/// A server that owns the listening socket of a single user.
///
/// The socket is bound with whatever mode the process umask yields;
/// the privileged parent narrows it down before any client is
/// supposed to trust it.
pub struct Server {
    uid: u32,
    path: PathBuf,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the unix socket at `path` and start accepting connections.
    ///
    /// A bind failure propagates; two servers never share a listener.
    pub fn bind(path: &Path, uid: u32) -> Result<Self, Error> {
        let listener = UnixListener::bind(path)?;
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(listener, uid, shutdown.clone()));

        info!("socket server listening"; "uid" => uid, "path" => %path.display());

        Ok(Self {
            uid,
            path: path.to_path_buf(),
            shutdown,
        })
    }

    /// The uid this server is reserved for.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Close the listener and remove the socket file.
    ///
    /// Closing unblocks the pending accept.  Closing twice is a no-op.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        // The listener does not unlink its socket file on drop.
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                error!("failed to remove socket file: {}", err);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until the server has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

async fn accept_loop(listener: UnixListener, uid: u32, shutdown: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = listener.accept() => match result {
                Ok((stream, _)) => stream,
                Err(err) => {
                    if shutdown.is_cancelled() {
                        return;
                    }
                    // A failed connection attempt must not take the
                    // listener down.
                    error!("socket server accept error: {}", err);
                    continue;
                }
            },
        };

        debug!("accepted connection"; "uid" => uid);

        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, shutdown).await {
                error!("socket server connection error: {}", err);
            }
        });
    }
}

/// Run the version handshake and hold the connection until the peer
/// disconnects or the server closes.
async fn handle_connection(
    mut stream: UnixStream,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    stream.write_u8(PROTOCOL_VERSION).await?;
    let version = stream.read_u8().await?;
    if version != PROTOCOL_VERSION {
        return Err(Error::VersionMismatch(version, PROTOCOL_VERSION));
    }

    // TODO: hand the stream off to the application protocol once one
    // is defined; until then the connection is kept open and drained.
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            result = stream.read(&mut buf) => {
                if result? == 0 {
                    return Ok(());
                }
            }
        }
    }
}
