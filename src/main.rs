//! `usockd` runs as two cooperating processes out of one binary: the
//! privileged parent (the default) and the unprivileged socket daemon
//! that the parent launches with `-s` under the service account.

use clap::Parser;
use std::{process, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};
use usockd::{daemon::Daemon, parent::Parent, Config, Error};
use usockd_log::{error, info};

/// Privilege-separated per-user Unix socket broker.
#[derive(Debug, Parser)]
#[command(name = "usockd", version)]
struct Args {
    /// Run the unprivileged socket daemon instead of the parent.
    #[arg(short = 's', long = "socket-daemon")]
    socket_daemon: bool,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let name = if args.socket_daemon {
        "usockd-socket"
    } else {
        "usockd-parent"
    };

    let _guard = match usockd_log::init(
        name,
        &usockd_log::Config {
            foreground: true,
            verbose: args.verbose,
        },
    ) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("{}: failed to set up logging: {}", name, err);
            process::exit(1);
        }
    };

    let config = Config::default();

    let result = if args.socket_daemon {
        run_socket_daemon(config).await
    } else {
        run_parent(config, args.verbose).await
    };

    if let Err(err) = result {
        error!("{}: {}", name, err);
        process::exit(1);
    }
}

/// Run the privileged parent and keep the unprivileged socket daemon
/// alive next to it.
async fn run_parent(config: Config, verbose: bool) -> Result<(), Error> {
    let parent = Arc::new(Parent::new(&config).await?);

    // The parent has no reason to keep running without the socket
    // daemon, so its exit tears the parent down as well.
    tokio::spawn({
        let parent = parent.clone();
        async move {
            if let Err(err) = parent.run_daemon(verbose).await {
                error!("socket daemon failed: {}", err);
            }
            parent.close();
        }
    });

    tokio::spawn({
        let parent = parent.clone();
        async move {
            if let Err(err) = wait_for_signal().await {
                error!("failed to install signal handlers: {}", err);
            } else {
                info!("exiting parent daemon");
            }
            parent.close();
        }
    });

    parent.wait().await
}

async fn run_socket_daemon(config: Config) -> Result<(), Error> {
    let daemon = Arc::new(Daemon::new(&config)?);

    tokio::spawn({
        let daemon = daemon.clone();
        async move {
            if let Err(err) = wait_for_signal().await {
                error!("failed to install signal handlers: {}", err);
            } else {
                info!("exiting socket daemon");
            }
            daemon.close();
        }
    });

    daemon.wait().await;

    Ok(())
}

/// Suspend until the process receives an interrupt or terminate
/// signal.
async fn wait_for_signal() -> Result<(), Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }

    Ok(())
}
