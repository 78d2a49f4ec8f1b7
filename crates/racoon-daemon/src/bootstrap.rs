//! Startup argument channel.
//!
//! A supervisor may hand the daemon its command line over a Unix stream
//! instead of `argv`:
//!
//! ```text
//! +--------+-----------+--------+-----------+-----+------+
//! | len(1) | arg bytes | len(1) | arg bytes | ... | 0xFF |
//! +--------+-----------+--------+-----------+-----+------+
//! ```
//!
//! Once startup succeeds the daemon answers with a single byte: the number
//! of arguments it received.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Length byte that ends the argument list.
pub const ARGUMENT_TERMINATOR: u8 = 0xFF;

/// Most arguments accepted after the program name.
pub const MAX_BOOTSTRAP_ARGUMENTS: usize = 254;

/// Errors reading startup arguments.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The stream ended where a length byte was expected.
    #[error("Argument list ended before the terminator (after {index} arguments)")]
    MissingLength { index: usize },

    #[error("Argument {index} truncated: expected {expected} bytes, got {received}")]
    Truncated {
        index: usize,
        expected: usize,
        received: usize,
    },

    #[error("Argument {index} is {len} bytes, longer than a length byte allows")]
    ArgumentTooLong { index: usize, len: usize },

    #[error("More than {max} startup arguments")]
    TooManyArguments { max: usize },

    #[error("Argument {index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },

    #[error("Bootstrap channel error: {0}")]
    Io(#[from] io::Error),
}

/// Reads length-prefixed arguments up to the terminator.
pub fn read_arguments<R: Read>(reader: &mut R) -> Result<Vec<String>, BootstrapError> {
    let mut arguments = Vec::new();
    loop {
        let index = arguments.len();
        let mut len = [0u8; 1];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(BootstrapError::MissingLength { index });
            }
            Err(e) => return Err(e.into()),
        }

        if len[0] == ARGUMENT_TERMINATOR {
            return Ok(arguments);
        }
        if index == MAX_BOOTSTRAP_ARGUMENTS {
            return Err(BootstrapError::TooManyArguments {
                max: MAX_BOOTSTRAP_ARGUMENTS,
            });
        }

        let expected = usize::from(len[0]);
        let mut bytes = Vec::with_capacity(expected);
        let received = reader.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
        if received < expected {
            return Err(BootstrapError::Truncated {
                index,
                expected,
                received,
            });
        }

        let argument =
            String::from_utf8(bytes).map_err(|_| BootstrapError::InvalidUtf8 { index })?;
        arguments.push(argument);
    }
}

/// Writes the one-byte argument count, saturating at
/// [`MAX_BOOTSTRAP_ARGUMENTS`].
pub fn acknowledge<W: Write>(writer: &mut W, count: usize) -> io::Result<()> {
    let byte = count.min(MAX_BOOTSTRAP_ARGUMENTS) as u8;
    writer.write_all(&[byte])?;
    writer.flush()
}

/// Encodes `arguments` in channel format. Used by supervisors and tests.
pub fn encode_arguments<S: AsRef<str>>(arguments: &[S]) -> Result<Vec<u8>, BootstrapError> {
    if arguments.len() > MAX_BOOTSTRAP_ARGUMENTS {
        return Err(BootstrapError::TooManyArguments {
            max: MAX_BOOTSTRAP_ARGUMENTS,
        });
    }
    let mut out = Vec::new();
    for (index, argument) in arguments.iter().enumerate() {
        let bytes = argument.as_ref().as_bytes();
        match u8::try_from(bytes.len()) {
            Ok(len) if len != ARGUMENT_TERMINATOR => {
                out.push(len);
                out.extend_from_slice(bytes);
            }
            _ => {
                return Err(BootstrapError::ArgumentTooLong {
                    index,
                    len: bytes.len(),
                });
            }
        }
    }
    out.push(ARGUMENT_TERMINATOR);
    Ok(out)
}

/// One accepted supervisor connection.
#[derive(Debug)]
pub struct BootstrapChannel {
    stream: UnixStream,
    path: PathBuf,
    received: usize,
}

impl BootstrapChannel {
    /// Listens on `path`, accepts a single connection and removes the
    /// socket file.
    pub fn accept(path: &Path) -> Result<Self, BootstrapError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "waiting for bootstrap connection");
        let (stream, _) = listener.accept()?;
        drop(listener);
        std::fs::remove_file(path)?;

        Ok(Self::from_stream(stream, path))
    }

    pub fn from_stream(stream: UnixStream, path: impl Into<PathBuf>) -> Self {
        Self {
            stream,
            path: path.into(),
            received: 0,
        }
    }

    pub fn receive_arguments(&mut self) -> Result<Vec<String>, BootstrapError> {
        let arguments = read_arguments(&mut self.stream)?;
        self.received = arguments.len();
        debug!(
            path = %self.path.display(),
            count = arguments.len(),
            "received bootstrap arguments"
        );
        Ok(arguments)
    }

    /// Reports successful startup to the supervisor.
    pub fn acknowledge(&mut self) -> Result<(), BootstrapError> {
        acknowledge(&mut self.stream, self.received)?;
        Ok(())
    }
}
