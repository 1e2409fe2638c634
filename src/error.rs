//! Tunnel error types.
//!
//! Construction failures (`InvalidConfig`, `DeviceOpen`, `CommandFailed`,
//! `CommandSpawn`, `ReadLoopSpawn`) abort `Tunnel` creation. Per-call
//! failures (`Read`, `Write`, `Closed`) are returned to that call only.

use std::io;

use thiserror::Error;

/// Result type for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

#[derive(Error, Debug)]
pub enum TunnelError {
    // ========================================
    // Construction
    // ========================================
    /// Configuration rejected before any device was touched.
    #[error("invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// The kernel refused to hand out the TUN device.
    #[error("failed to open TUN device '{name}': {source}")]
    DeviceOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A network configuration command exited non-zero.
    #[error("{command}: {output}")]
    CommandFailed { command: String, output: String },

    /// A network configuration command could not be started at all.
    #[error("failed to run '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to start read loop: {0}")]
    ReadLoopSpawn(#[source] io::Error),

    // ========================================
    // Packet I/O
    // ========================================
    #[error("TUN read failed: {0}")]
    Read(#[source] io::Error),

    #[error("TUN write failed: {0}")]
    Write(#[source] io::Error),

    /// The tunnel has been closed.
    #[error("tunnel is closed")]
    Closed,
}

impl TunnelError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn device_open(name: impl Into<String>, source: io::Error) -> Self {
        Self::DeviceOpen {
            name: name.into(),
            source,
        }
    }

    /// Returns `true` if retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Read(source) | Self::Write(source) => is_transient(source),
            _ => false,
        }
    }

    /// Returns `true` if the failure points at missing privileges.
    #[must_use]
    pub fn requires_privileges(&self) -> bool {
        match self {
            Self::DeviceOpen { source, .. } | Self::CommandSpawn { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            Self::CommandFailed { output, .. } => {
                let output = output.to_ascii_lowercase();
                output.contains("operation not permitted") || output.contains("permission denied")
            }
            _ => false,
        }
    }
}

/// `EAGAIN`/`EWOULDBLOCK` on a non-blocking handle, or an interrupted call.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl From<TunnelError> for io::Error {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::Read(source) | TunnelError::Write(source) => source,
            TunnelError::DeviceOpen { source, .. } => source,
            closed @ TunnelError::Closed => io::Error::new(io::ErrorKind::NotConnected, closed),
            invalid @ TunnelError::InvalidConfig { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, invalid)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
