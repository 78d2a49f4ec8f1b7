use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use racoon_protocol::{
    Envelope, PrivRequest, PrivResponse, ProtocolError, ScriptKind, read_frame, write_frame,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::fdpass::recv_fd;
use super::{PrivateKey, PrivilegedOps};
use crate::error::{DaemonError, DaemonResult};

/// Sends privileged operations to a helper over a Unix stream.
///
/// One request frame, one response frame per call. An opened control
/// socket follows its response frame as `SCM_RIGHTS` data.
///
/// A call that fails partway through (timeout, short read, foreign request
/// id) may leave a stale reply in the stream. The connection is then
/// poisoned and every later call fails with
/// [`DaemonError::HelperDesynchronized`].
#[derive(Debug)]
pub struct ForwardingPrivileged {
    stream: UnixStream,
    poisoned: bool,
}

impl ForwardingPrivileged {
    /// Connects to the helper listening at `path`.
    pub fn connect(path: &Path) -> DaemonResult<Self> {
        let stream = UnixStream::connect(path)?;
        debug!(socket = %path.display(), "connected to privileged helper");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            poisoned: false,
        }
    }

    /// Bounds how long a single call may block. `None` waits forever.
    pub fn with_timeout(self, timeout: Option<Duration>) -> DaemonResult<Self> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(self)
    }

    /// Whether an earlier failure made the connection unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Checks that the helper is alive.
    pub fn ping(&mut self) -> DaemonResult<()> {
        match self.call(PrivRequest::Ping)? {
            PrivResponse::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn call(&mut self, request: PrivRequest) -> DaemonResult<PrivResponse> {
        if self.poisoned {
            return Err(DaemonError::HelperDesynchronized);
        }
        let result = self.exchange(request);
        if let Err(e) = &result {
            if !matches!(e, DaemonError::Privileged(_)) {
                warn!(error = %e, "privileged helper connection poisoned");
                self.poisoned = true;
            }
        }
        result
    }

    fn exchange(&mut self, request: PrivRequest) -> DaemonResult<PrivResponse> {
        let request_id = Uuid::new_v4().to_string();
        let operation = request.operation();
        debug!(%request_id, operation, "forwarding privileged request");

        write_frame(&mut self.stream, &Envelope::new(request_id.clone(), request))?;
        let response: Envelope<PrivResponse> = read_frame(&mut self.stream)?.ok_or_else(|| {
            ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into())
        })?;

        if !response.is_compatible() {
            return Err(ProtocolError::UnsupportedVersion(response.protocol_version).into());
        }
        if response.request_id != request_id {
            return Err(ProtocolError::RequestIdMismatch {
                expected: request_id,
                received: response.request_id,
            }
            .into());
        }

        match response.payload {
            PrivResponse::Error { error } => Err(error.into()),
            payload => Ok(payload),
        }
    }
}

fn unexpected(response: &PrivResponse) -> DaemonError {
    ProtocolError::UnexpectedResponse(response.kind().to_string()).into()
}

impl PrivilegedOps for ForwardingPrivileged {
    fn open_control_socket(&mut self) -> DaemonResult<OwnedFd> {
        match self.call(PrivRequest::OpenControlSocket)? {
            PrivResponse::ControlSocket => {
                let fd = recv_fd(&self.stream).inspect_err(|_| self.poisoned = true)?;
                debug!(fd = fd.as_raw_fd(), "received control socket from helper");
                Ok(fd)
            }
            other => {
                // The helper may still send a descriptor we will never read.
                self.poisoned = true;
                Err(unexpected(&other))
            }
        }
    }

    fn close_control_socket(&mut self, fd: OwnedFd) {
        debug!(fd = fd.as_raw_fd(), "closing control socket");
        drop(fd);
    }

    fn load_private_key(&mut self, path: &Path) -> DaemonResult<PrivateKey> {
        let request = PrivRequest::LoadPrivateKey {
            path: path.to_path_buf(),
        };
        match self.call(request)? {
            PrivResponse::PrivateKey { key } => Ok(PrivateKey::new(key)),
            other => Err(unexpected(&other)),
        }
    }

    fn run_script(&mut self, path: &Path, kind: ScriptKind, environment: &[String]) -> i32 {
        let request = PrivRequest::RunScript {
            path: path.to_path_buf(),
            kind,
            environment: environment.to_vec(),
        };
        match self.call(request) {
            Ok(PrivResponse::ScriptStatus { status }) => status,
            Ok(other) => {
                warn!(%kind, response = other.kind(), "unexpected reply to script request");
                -1
            }
            Err(e) => {
                warn!(%kind, path = %path.display(), error = %e, "script request failed");
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racoon_protocol::{ErrorCode, PROTOCOL_VERSION};
    use std::thread;

    /// Answers each request with the next canned payload, echoing ids.
    fn canned_helper(responses: Vec<PrivResponse>) -> (UnixStream, thread::JoinHandle<Vec<PrivRequest>>) {
        let (client, mut server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for payload in responses {
                let Some(request): Option<Envelope<PrivRequest>> = read_frame(&mut server).unwrap()
                else {
                    break;
                };
                seen.push(request.payload);
                write_frame(&mut server, &Envelope::new(request.request_id, payload)).unwrap();
            }
            seen
        });
        (client, handle)
    }

    #[test]
    fn ping_round_trip() {
        let (stream, helper) = canned_helper(vec![PrivResponse::Pong]);
        let mut ops = ForwardingPrivileged::from_stream(stream);
        ops.ping().unwrap();
        assert_eq!(helper.join().unwrap(), vec![PrivRequest::Ping]);
    }

    #[test]
    fn helper_error_is_surfaced() {
        let (stream, helper) = canned_helper(vec![PrivResponse::error(
            ErrorCode::NotFound,
            "no such file",
        )]);
        let mut ops = ForwardingPrivileged::from_stream(stream);

        let err = ops.load_private_key(Path::new("/etc/racoon/missing.key")).unwrap_err();
        assert!(matches!(err, DaemonError::Privileged(ref e) if e.code == ErrorCode::NotFound));
        assert_eq!(err.error_code(), ErrorCode::NotFound);
        helper.join().unwrap();
    }

    #[test]
    fn wrong_payload_is_a_protocol_error() {
        let (stream, helper) = canned_helper(vec![PrivResponse::Pong]);
        let mut ops = ForwardingPrivileged::from_stream(stream);

        let err = ops.load_private_key(Path::new("/k")).unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Protocol(ProtocolError::UnexpectedResponse(ref kind)) if kind == "pong"
        ));
        helper.join().unwrap();
    }

    #[test]
    fn script_failures_become_negative_status() {
        let (stream, helper) = canned_helper(vec![PrivResponse::ScriptStatus { status: 7 }]);
        let mut ops = ForwardingPrivileged::from_stream(stream);

        let status = ops.run_script(Path::new("/s"), ScriptKind::Phase1Down, &[]);
        assert_eq!(status, 7);
        helper.join().unwrap();

        // Helper gone.
        let status = ops.run_script(Path::new("/s"), ScriptKind::Phase1Down, &[]);
        assert_eq!(status, -1);
    }

    #[test]
    fn late_reply_poisons_connection() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let helper = thread::spawn(move || {
            let first: Envelope<PrivRequest> = read_frame(&mut server).unwrap().unwrap();
            thread::sleep(Duration::from_millis(300));
            let key_a = PrivResponse::PrivateKey {
                key: b"KEY-A".to_vec(),
            };
            write_frame(&mut server, &Envelope::new(first.request_id, key_a)).unwrap();

            // Anything still arriving is answered in order.
            while let Ok(Some(request)) = read_frame::<_, Envelope<PrivRequest>>(&mut server) {
                let key_b = PrivResponse::PrivateKey {
                    key: b"KEY-B".to_vec(),
                };
                if write_frame(&mut server, &Envelope::new(request.request_id, key_b)).is_err() {
                    break;
                }
            }
        });

        let mut ops = ForwardingPrivileged::from_stream(client)
            .with_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        let first = ops.load_private_key(Path::new("/keys/a.key"));
        assert!(matches!(first, Err(DaemonError::Protocol(ProtocolError::Io(_)))));
        assert!(ops.is_poisoned());

        thread::sleep(Duration::from_millis(400));
        let second = ops.load_private_key(Path::new("/keys/b.key"));
        assert!(matches!(second, Err(DaemonError::HelperDesynchronized)));
        assert_eq!(ops.run_script(Path::new("/s"), ScriptKind::Phase1Up, &[]), -1);

        drop(ops);
        helper.join().unwrap();
    }

    #[test]
    fn foreign_request_id_poisons_connection() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let helper = thread::spawn(move || {
            let _request: Envelope<PrivRequest> = read_frame(&mut server).unwrap().unwrap();
            write_frame(&mut server, &Envelope::new("someone-else", PrivResponse::Pong)).unwrap();
        });

        let mut ops = ForwardingPrivileged::from_stream(client);
        let err = ops.ping().unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Protocol(ProtocolError::RequestIdMismatch { ref received, .. })
                if received == "someone-else"
        ));
        assert!(matches!(ops.ping(), Err(DaemonError::HelperDesynchronized)));
        helper.join().unwrap();
    }

    #[test]
    fn helper_errors_keep_connection_usable() {
        let (stream, helper) = canned_helper(vec![
            PrivResponse::error(ErrorCode::NotFound, "no such file"),
            PrivResponse::Pong,
        ]);
        let mut ops = ForwardingPrivileged::from_stream(stream);

        assert!(ops.load_private_key(Path::new("/k")).is_err());
        assert!(!ops.is_poisoned());
        ops.ping().unwrap();
        helper.join().unwrap();
    }

    #[test]
    fn incompatible_version_rejected() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let helper = thread::spawn(move || {
            let request: Envelope<PrivRequest> = read_frame(&mut server).unwrap().unwrap();
            let mut reply = Envelope::new(request.request_id, PrivResponse::Pong);
            reply.protocol_version = format!("{PROTOCOL_VERSION}-next");
            write_frame(&mut server, &reply).unwrap();
        });

        let mut ops = ForwardingPrivileged::from_stream(client);
        let err = ops.ping().unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Protocol(ProtocolError::UnsupportedVersion(_))
        ));
        helper.join().unwrap();
    }
}
