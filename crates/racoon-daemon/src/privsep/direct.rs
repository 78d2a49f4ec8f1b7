use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use racoon_protocol::ScriptKind;
use tracing::{debug, warn};

use super::{PathConfinement, PrivateKey, PrivilegedOps};
use crate::error::{DaemonError, DaemonResult};

/// PEM labels whose body is DER private key material.
const PEM_KEY_LABELS: &[&str] = &["PRIVATE KEY", "RSA PRIVATE KEY", "EC PRIVATE KEY"];

/// Runs privileged operations in the calling process.
///
/// [`DirectPrivileged::new`] accepts any path; the helper and the daemon
/// itself use [`DirectPrivileged::confined`].
#[derive(Debug, Default)]
pub struct DirectPrivileged {
    confinement: Option<PathConfinement>,
}

impl DirectPrivileged {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts key and script paths to `confinement`'s directories.
    pub fn confined(confinement: PathConfinement) -> Self {
        Self {
            confinement: Some(confinement),
        }
    }

    pub fn confinement(&self) -> Option<&PathConfinement> {
        self.confinement.as_ref()
    }
}

impl PrivilegedOps for DirectPrivileged {
    fn open_control_socket(&mut self) -> DaemonResult<OwnedFd> {
        let fd = open_pfkey()?;
        debug!(fd = fd.as_raw_fd(), "opened PF_KEY socket");
        Ok(fd)
    }

    fn close_control_socket(&mut self, fd: OwnedFd) {
        debug!(fd = fd.as_raw_fd(), "closing control socket");
        drop(fd);
    }

    fn load_private_key(&mut self, path: &Path) -> DaemonResult<PrivateKey> {
        let path = match &self.confinement {
            Some(confinement) => confinement.key_path(path)?,
            None => path.to_path_buf(),
        };
        let contents = std::fs::read(&path)?;
        let key =
            decode_private_key(&contents).map_err(|message| DaemonError::key(&path, message))?;
        debug!(path = %path.display(), len = key.len(), "loaded private key");
        Ok(key)
    }

    fn run_script(&mut self, path: &Path, kind: ScriptKind, environment: &[String]) -> i32 {
        let path = match &self.confinement {
            Some(confinement) => match confinement.script_path(path) {
                Ok(path) => path,
                Err(e) => {
                    warn!(%kind, error = %e, "phase script refused");
                    return -1;
                }
            },
            None => path.to_path_buf(),
        };
        // Script execution is not wired up; callers always see success.
        debug!(
            path = %path.display(),
            %kind,
            variables = environment.len(),
            "phase script not executed"
        );
        0
    }
}

#[cfg(target_os = "linux")]
fn open_pfkey() -> io::Result<OwnedFd> {
    use std::os::fd::FromRawFd;

    const PF_KEY_V2: libc::c_int = 2;

    // SAFETY: plain socket(2) call; the result is checked before use.
    let fd = unsafe {
        libc::socket(
            libc::PF_KEY,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            PF_KEY_V2,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` is a freshly opened descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(target_os = "linux"))]
fn open_pfkey() -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "PF_KEY sockets are only supported on Linux",
    ))
}

/// Turns key file contents into DER.
///
/// Raw DER (a leading SEQUENCE tag) is returned unchanged. PEM is decoded
/// from its first PKCS#8, PKCS#1 or SEC1 block; encrypted PEM and other
/// formats such as OpenSSH keys are refused.
pub fn decode_private_key(contents: &[u8]) -> Result<PrivateKey, String> {
    match contents.first() {
        None => return Err("file is empty".to_string()),
        Some(0x30) => return Ok(PrivateKey::new(contents.to_vec())),
        Some(_) => {}
    }

    let text = std::str::from_utf8(contents).map_err(|_| "neither DER nor PEM".to_string())?;
    let mut lines = text.lines().map(str::trim);

    lines
        .by_ref()
        .find(|line| {
            line.strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
                .is_some_and(|label| PEM_KEY_LABELS.contains(&label))
        })
        .ok_or_else(|| "no PEM private key block".to_string())?;

    let mut body = String::new();
    let mut terminated = false;
    for line in lines {
        if line.starts_with("-----END ") {
            terminated = true;
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("Proc-Type") && value.contains("ENCRYPTED") {
                return Err("encrypted keys are not supported".to_string());
            }
            continue;
        }
        body.push_str(line);
    }
    if !terminated {
        return Err("PEM block is not terminated".to_string());
    }

    let der = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| format!("invalid PEM body: {e}"))?;
    if der.is_empty() {
        return Err("PEM block is empty".to_string());
    }
    Ok(PrivateKey::new(der))
}
