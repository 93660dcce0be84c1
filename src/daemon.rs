//! The unprivileged socket daemon.
//!
//! Owns the registry of per-user socket servers.  The daemon never
//! runs with elevated rights; the privileged parent launches it under
//! the service account and corrects the ownership of the sockets it
//! binds.

use crate::{server::Server, Config, Error};
use nix::unistd::{Uid, User};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use usockd_log::info;

/// The unprivileged socket daemon.
pub struct Daemon {
    config: Config,
    servers: Arc<Mutex<HashMap<u32, Arc<Server>>>>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Start the daemon and bind the initial socket server.
    ///
    /// Fails with `PermissionDenied` unless running under the service
    /// account from the configuration.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let user = User::from_name(&config.username)?
            .ok_or_else(|| Error::UserNotFound(config.username.clone()))?;
        if Uid::effective() != user.uid {
            return Err(Error::PermissionDenied(config.username.clone()));
        }

        let daemon = Self {
            config: config.clone(),
            servers: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        };

        // Socket server for root, so privileged clients can connect
        // through the same broker.
        daemon.add_server(0)?;

        info!("socket daemon running");

        Ok(daemon)
    }

    /// Bind a new socket server for `uid` and register it.
    ///
    /// Fails with `AlreadyExists` if a live server is already
    /// registered for this uid; the existing server is left untouched.
    pub fn add_server(&self, uid: u32) -> Result<(), Error> {
        if self.servers.lock().contains_key(&uid) {
            return Err(Error::AlreadyExists(uid));
        }

        // Bind outside of the lock.  Two racing registrations for the
        // same uid cannot both succeed here since they bind the same
        // path.
        let path = self.config.socket_path(uid);
        let server = Arc::new(Server::bind(&path, uid)?);

        self.servers.lock().insert(uid, server.clone());

        // Deregister the uid once its server closes.  When the whole
        // daemon is shutting down the registry is torn down as a
        // whole, so the entry is left alone.
        tokio::spawn({
            let shutdown = self.shutdown.clone();
            let servers = self.servers.clone();
            async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = server.closed() => {
                        servers.lock().remove(&uid);
                    }
                }
            }
        });

        Ok(())
    }

    /// The registered server for `uid`, if any.
    pub fn server(&self, uid: u32) -> Option<Arc<Server>> {
        self.servers.lock().get(&uid).cloned()
    }

    pub fn has_server(&self, uid: u32) -> bool {
        self.servers.lock().contains_key(&uid)
    }

    /// The uids that currently have a registered server.
    pub fn uids(&self) -> Vec<u32> {
        let mut uids: Vec<u32> = self.servers.lock().keys().copied().collect();
        uids.sort_unstable();
        uids
    }

    /// Close the daemon and every registered socket server.
    ///
    /// Closing twice is a no-op.  The per-server deregistration tasks
    /// are not waited for; they exit on the shutdown signal.
    pub fn close(&self) {
        self.shutdown.cancel();

        let servers: Vec<Arc<Server>> = self
            .servers
            .lock()
            .drain()
            .map(|(_, server)| server)
            .collect();

        for server in servers {
            server.close();
        }
    }

    /// Wait until the daemon has been closed.
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
    }
}
