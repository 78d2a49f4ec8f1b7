use std::os::fd::AsFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use racoon_protocol::{Envelope, ErrorCode, PrivRequest, PrivResponse, read_frame, write_frame};
use tracing::{debug, error, info, warn};

use super::fdpass::send_fd;
use super::{DirectPrivileged, PathConfinement, PrivilegedOps};
use crate::error::DaemonResult;

/// Helper side of the forwarding channel.
#[derive(Debug)]
pub struct PrivilegedServer<P> {
    ops: P,
}

impl<P: PrivilegedOps> PrivilegedServer<P> {
    pub fn new(ops: P) -> Self {
        Self { ops }
    }

    /// Answers requests on `stream` until the client disconnects.
    pub fn serve(&mut self, mut stream: UnixStream) -> DaemonResult<()> {
        let mut handled = 0u64;
        while let Some(request) = read_frame::<_, Envelope<PrivRequest>>(&mut stream)? {
            let request_id = request.request_id.clone();
            let operation = request.payload.operation();
            debug!(%request_id, operation, "privileged request");

            if !request.is_compatible() {
                warn!(%request_id, version = %request.protocol_version, "incompatible client");
                let reply = PrivResponse::error(
                    ErrorCode::InvalidRequest,
                    format!("unsupported protocol version {}", request.protocol_version),
                );
                write_frame(&mut stream, &Envelope::new(request_id, reply))?;
                continue;
            }

            match request.payload {
                PrivRequest::OpenControlSocket => match self.ops.open_control_socket() {
                    Ok(fd) => {
                        write_frame(&mut stream, &Envelope::new(request_id, PrivResponse::ControlSocket))?;
                        send_fd(&stream, fd.as_fd())?;
                        self.ops.close_control_socket(fd);
                    }
                    Err(e) => {
                        warn!(operation, error = %e, "privileged operation failed");
                        let reply = PrivResponse::error(e.error_code(), e.to_string());
                        write_frame(&mut stream, &Envelope::new(request_id, reply))?;
                    }
                },
                PrivRequest::LoadPrivateKey { path } => {
                    let reply = match self.ops.load_private_key(&path) {
                        Ok(key) => PrivResponse::PrivateKey {
                            key: key.into_bytes(),
                        },
                        Err(e) => {
                            warn!(operation, path = %path.display(), error = %e, "privileged operation failed");
                            PrivResponse::error(e.error_code(), e.to_string())
                        }
                    };
                    write_frame(&mut stream, &Envelope::new(request_id, reply))?;
                }
                PrivRequest::RunScript {
                    path,
                    kind,
                    environment,
                } => {
                    let status = self.ops.run_script(&path, kind, &environment);
                    let reply = PrivResponse::ScriptStatus { status };
                    write_frame(&mut stream, &Envelope::new(request_id, reply))?;
                }
                PrivRequest::Ping => {
                    write_frame(&mut stream, &Envelope::new(request_id, PrivResponse::Pong))?;
                }
            }
            handled += 1;
        }
        debug!(handled, "privileged client disconnected");
        Ok(())
    }

    pub fn into_inner(self) -> P {
        self.ops
    }
}

/// Serves in-process privileged operations on a Unix socket at `path`,
/// one client at a time, forever. Key and script requests are confined to
/// `confinement`'s directories.
pub fn run_listener(path: &Path, confinement: PathConfinement) -> DaemonResult<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    info!(
        socket = %path.display(),
        keys = %confinement.key_dir().display(),
        scripts = %confinement.script_dir().display(),
        "privileged helper listening"
    );

    let mut server = PrivilegedServer::new(DirectPrivileged::confined(confinement));
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = server.serve(stream) {
            error!(error = %e, "privileged session ended with an error");
        }
    }
    Ok(())
}
