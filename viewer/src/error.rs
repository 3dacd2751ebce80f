use std::fmt;
use std::path::PathBuf;

/// Typed error for live connections and session mode switches.
#[derive(Debug)]
pub enum SessionError {
    /// The monitor port could not be reached.
    Connect { addr: String, source: std::io::Error },
    /// The drawing port could not be bound.
    Bind { port: u16, source: std::io::Error },
    /// A log could not be opened for playback.
    Log(spark_replays::Error),
    /// A recording file could not be created or written.
    Recording { path: PathBuf, source: std::io::Error },
    /// I/O error on an established connection.
    Io(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { addr, source } => write!(f, "could not connect to {addr}: {source}"),
            Self::Bind { port, source } => write!(f, "could not bind drawing port {port}: {source}"),
            Self::Log(e) => write!(f, "could not open log: {e}"),
            Self::Recording { path, source } => {
                write!(f, "could not record to {}: {source}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. }
            | Self::Bind { source, .. }
            | Self::Recording { source, .. } => Some(source),
            Self::Log(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<spark_replays::Error> for SessionError {
    fn from(e: spark_replays::Error) -> Self {
        Self::Log(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
