use nix::unistd::{Uid, User};
use std::{fs, os::unix::fs::PermissionsExt};
use tempfile::{tempdir, TempDir};
use tokio::{io::AsyncWriteExt, net::UnixListener};
use usockd::{
    daemon::Daemon,
    parent::fixup_socket,
    session::{verify_socket, Session},
    Config, Error,
};

fn test_config(dir: &TempDir) -> Config {
    let user = User::from_uid(Uid::effective()).unwrap().unwrap();
    Config {
        socket_dir: dir.path().to_path_buf(),
        username: user.name.into(),
    }
}

#[tokio::test]
async fn test_connect_not_found() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    match Session::connect(&config).await {
        Err(Error::NotFound(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_connect_refuses_broad_mode() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let path = config.socket_path(Uid::effective().as_raw());

    let _listener = UnixListener::bind(&path).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

    match Session::connect(&config).await {
        Err(Error::InvalidPermission(mode)) => assert_eq!(mode, 0o666),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_connect_refuses_regular_file() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let path = config.socket_path(Uid::effective().as_raw());

    // A decoy with the right mode but the wrong file type.
    fs::write(&path, b"decoy").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

    match Session::connect(&config).await {
        Err(Error::NotASocket(p)) => assert_eq!(p, path),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_verify_refuses_foreign_owner() {
    let dir = tempdir().unwrap();
    let uid = Uid::effective().as_raw();
    let path = dir.path().join(uid.to_string());

    let _listener = UnixListener::bind(&path).unwrap();
    fixup_socket(&path).unwrap();

    // The socket is fine for its own user...
    let user = User::from_uid(Uid::effective()).unwrap().unwrap();
    verify_socket(&path, uid, user.gid.as_raw()).unwrap();

    // ...but a caller with a different identity must not trust it.
    match verify_socket(&path, uid + 1, user.gid.as_raw()) {
        Err(Error::OwnershipMismatch(owner, _)) => assert_eq!(owner, uid),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_end_to_end_connect() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let uid = Uid::effective().as_raw();

    let daemon = Daemon::new(&config).unwrap();
    if uid != 0 {
        daemon.add_server(uid).unwrap();
    }

    // Stand in for the privileged parent's watch handler.
    fixup_socket(&config.socket_path(uid)).unwrap();

    let session = Session::connect(&config).await.unwrap();
    assert_eq!(session.uid(), uid);

    // The handshake already ran; the stream is ready for the
    // application layer.
    let mut stream = session.into_stream();
    stream.write_all(b"ping").await.unwrap();
    drop(stream);

    daemon.close();
}

#[tokio::test]
async fn test_connect_before_fixup_is_refused() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let uid = Uid::effective().as_raw();

    let daemon = Daemon::new(&config).unwrap();
    if uid != 0 {
        daemon.add_server(uid).unwrap();
    }

    // Without the fixup the socket still carries its creation mode
    // and must not be trusted.
    match Session::connect(&config).await {
        Err(Error::InvalidPermission(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    daemon.close();
}
