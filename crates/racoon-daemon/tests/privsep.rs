//! Forwarded privileged operations over a socket pair.

use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;

use racoon_daemon::{
    DaemonResult, DirectPrivileged, ForwardingPrivileged, PrivateKey, PrivilegedOps,
    PrivilegedServer,
};
use racoon_protocol::ScriptKind;

/// Backend that hands out one end of a datagram pair as the control socket
/// and records script requests.
struct TestBackend {
    peer: Option<UnixDatagram>,
    inner: DirectPrivileged,
    scripts: Vec<(PathBuf, ScriptKind, Vec<String>)>,
}

impl PrivilegedOps for TestBackend {
    fn open_control_socket(&mut self) -> DaemonResult<OwnedFd> {
        let (ours, peer) = UnixDatagram::pair()?;
        self.peer = Some(peer);
        Ok(OwnedFd::from(ours))
    }

    fn close_control_socket(&mut self, fd: OwnedFd) {
        drop(fd);
    }

    fn load_private_key(&mut self, path: &Path) -> DaemonResult<PrivateKey> {
        self.inner.load_private_key(path)
    }

    fn run_script(&mut self, path: &Path, kind: ScriptKind, environment: &[String]) -> i32 {
        self.scripts
            .push((path.to_path_buf(), kind, environment.to_vec()));
        42
    }
}

#[test]
fn forwarding_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("host.der");
    let der = [0x30, 0x03, 0x02, 0x01, 0x05];
    std::fs::write(&key_path, der).unwrap();

    let (client, server_end) = UnixStream::pair().unwrap();
    let helper = thread::spawn(move || {
        let mut server = PrivilegedServer::new(TestBackend {
            peer: None,
            inner: DirectPrivileged::new(),
            scripts: Vec::new(),
        });
        server.serve(server_end).unwrap();
        server.into_inner()
    });

    let mut ops = ForwardingPrivileged::from_stream(client);
    ops.ping().unwrap();

    // The passed descriptor is live: bytes from the backend's peer arrive.
    let fd = ops.open_control_socket().unwrap();
    let control = UnixDatagram::from(fd);

    let key = ops.load_private_key(&key_path).unwrap();
    assert_eq!(key.as_bytes(), der);

    let env = vec!["REMOTE_ADDR=192.0.2.7".to_string()];
    let status = ops.run_script(Path::new("/etc/racoon/scripts/up.sh"), ScriptKind::Phase1Up, &env);
    assert_eq!(status, 42);

    drop(ops);
    let backend = helper.join().unwrap();

    backend.peer.as_ref().unwrap().send(b"SADB_ACQUIRE").unwrap();
    let mut buf = [0u8; 32];
    let n = control.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"SADB_ACQUIRE");

    assert_eq!(
        backend.scripts,
        vec![(
            PathBuf::from("/etc/racoon/scripts/up.sh"),
            ScriptKind::Phase1Up,
            env
        )]
    );
}

#[test]
fn close_is_local() {
    let (client, mut server_end) = UnixStream::pair().unwrap();
    let mut ops = ForwardingPrivileged::from_stream(client);

    let (a, _b) = UnixDatagram::pair().unwrap();
    ops.close_control_socket(OwnedFd::from(a));

    // Nothing went over the wire.
    server_end.set_nonblocking(true).unwrap();
    let mut buf = [0u8; 1];
    let err = server_end.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}
