use thiserror::Error;

use crate::command::Command;
use crate::status::DriveStatus;

/// Result type alias for CD-ROM operations
pub type Result<T> = std::result::Result<T, CdError>;

/// Errors that can occur when driving the controller or reading a disc
#[derive(Debug, Error)]
pub enum CdError {
    /// I/O error occurred while reading or writing an image file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unrecognized disc image format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Parse error at specific offset
    #[error("Parse error at offset {offset}: {message}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Error message
        message: String,
    },

    /// A blocking command is still in flight
    #[error("Controller busy: {0:?} has not completed")]
    Busy(Command),

    /// The command needs a parameter that was not supplied
    #[error("Command {0:?} requires a parameter")]
    MissingParameter(Command),

    /// The controller answered a command with an error interrupt
    #[error("Command {command:?} rejected (status: {status})")]
    CommandRejected {
        /// Command that was rejected
        command: Command,
        /// Status byte returned with the error
        status: DriveStatus,
    },

    /// No interrupt arrived within the wait budget
    #[error("Timed out waiting for the controller")]
    Timeout,

    /// A sector read could not be started
    #[error("Read could not be started")]
    ReadStart,

    /// A sector read failed after all attempts
    #[error("Read failed after {attempts} attempt(s)")]
    ReadFailed {
        /// Number of attempts made
        attempts: u32,
    },

    /// A sector read was cancelled
    #[error("Read aborted")]
    Aborted,

    /// Filesystem-level fault, also latched as the last filesystem error
    #[error("Filesystem error: {0}")]
    Iso(IsoError),

    /// Requested session does not exist on the disc
    #[error("Session {0} does not exist")]
    NoSession(u8),

    /// File or directory not found in filesystem
    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl CdError {
    /// Create a parse error with context
    pub fn parse<S: Into<String>>(offset: usize, message: S) -> Self {
        CdError::ParseError {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid format error
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        CdError::InvalidFormat(message.into())
    }
}

impl From<IsoError> for CdError {
    fn from(err: IsoError) -> Self {
        CdError::Iso(err)
    }
}

/// Last filesystem error code, latched by every filesystem call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
pub enum IsoError {
    /// File system parser okay
    #[default]
    #[error("okay")]
    Okay,
    /// Logical seek error, e.g. querying the filesystem of an audio disc
    #[error("seek error")]
    SeekError,
    /// Read error while reading the descriptor, path table or a directory
    #[error("read error")]
    ReadError,
    /// Disc does not contain a standard ISO9660 file system
    #[error("invalid ISO9660 file system")]
    InvalidFilesystem,
    /// Lid was open when attempting to parse the file system
    #[error("lid is open")]
    LidOpen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CdError::CommandRejected {
            command: Command::Setloc,
            status: DriveStatus(DriveStatus::ERROR | DriveStatus::STANDBY),
        };
        assert_eq!(
            err.to_string(),
            "Command Setloc rejected (status: ERROR|STANDBY)"
        );
    }

    #[test]
    fn test_parse_error() {
        let err = CdError::parse(156, "Directory record overruns sector");
        assert_eq!(
            err.to_string(),
            "Parse error at offset 156: Directory record overruns sector"
        );
    }

    #[test]
    fn test_iso_error_wraps() {
        let err: CdError = IsoError::LidOpen.into();
        assert_eq!(err.to_string(), "Filesystem error: lid is open");
        assert_eq!(IsoError::default(), IsoError::Okay);
    }
}
