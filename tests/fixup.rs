use nix::unistd::{Uid, User};
use std::{
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt},
    time::Duration,
};
use tempfile::tempdir;
use tokio::net::UnixListener;
use usockd::{
    parent::{fixup_socket, Parent},
    Config, Error,
};

#[tokio::test]
async fn test_fixup_round_trip() {
    let dir = tempdir().unwrap();
    let uid = Uid::effective();
    let path = dir.path().join(uid.as_raw().to_string());
    let _listener = UnixListener::bind(&path).unwrap();

    fixup_socket(&path).unwrap();

    let meta = fs::symlink_metadata(&path).unwrap();
    assert_eq!(meta.permissions().mode() & 0o7777, 0o600);
    assert_eq!(meta.uid(), uid.as_raw());

    let user = User::from_uid(uid).unwrap().unwrap();
    assert_eq!(meta.gid(), user.gid.as_raw());
}

#[tokio::test]
async fn test_fixup_rejects_regular_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("0");
    fs::write(&path, b"decoy").unwrap();
    let before = fs::symlink_metadata(&path).unwrap().permissions().mode();

    match fixup_socket(&path) {
        Err(Error::NotASocket(p)) => assert_eq!(p, path),
        other => panic!("unexpected result: {:?}", other),
    }

    // The decoy's permissions are untouched.
    let after = fs::symlink_metadata(&path).unwrap().permissions().mode();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_fixup_rejects_invalid_name() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("not-a-uid");
    let _listener = UnixListener::bind(&path).unwrap();
    let before = fs::symlink_metadata(&path).unwrap().permissions().mode();

    match fixup_socket(&path) {
        Err(Error::InvalidSocketName(p)) => assert_eq!(p, path),
        other => panic!("unexpected result: {:?}", other),
    }

    let after = fs::symlink_metadata(&path).unwrap().permissions().mode();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_fixup_vanished_path_is_noop() {
    let dir = tempdir().unwrap();
    fixup_socket(&dir.path().join("4242")).unwrap();
}

#[tokio::test]
async fn test_parent_requires_root() {
    if Uid::effective().is_root() {
        return;
    }

    let dir = tempdir().unwrap();
    let socket_dir = dir.path().join("sockets");
    let config = Config {
        socket_dir: socket_dir.clone(),
        username: "nobody".into(),
    };

    match Parent::new(&config).await {
        Err(Error::PermissionDenied(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    // Refused before any filesystem mutation.
    assert!(!socket_dir.exists());
}

// The full watch scenario needs to chown to a foreign uid and only
// runs as root.
#[tokio::test]
async fn test_parent_watch_fixes_new_sockets() {
    if !Uid::effective().is_root() {
        return;
    }

    let dir = tempdir().unwrap();
    let config = Config {
        socket_dir: dir.path().join("sockets"),
        username: "root".into(),
    };

    let parent = Parent::new(&config).await.unwrap();

    let path = config.socket_path(0);
    let _listener = UnixListener::bind(&path).unwrap();

    // The watch latency is bounded only by the backend; poll the
    // metadata until the fixup has run.
    let mut fixed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let meta = fs::symlink_metadata(&path).unwrap();
        if meta.permissions().mode() & 0o7777 == 0o600 {
            assert_eq!(meta.uid(), 0);
            let root = User::from_uid(Uid::from_raw(0)).unwrap().unwrap();
            assert_eq!(meta.gid(), root.gid.as_raw());
            fixed = true;
            break;
        }
    }
    assert!(fixed, "socket file was not fixed up");

    parent.close();
    parent.wait().await.unwrap();
}
