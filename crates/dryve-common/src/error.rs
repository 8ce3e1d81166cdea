use thiserror::Error;

/// Drive stack error kinds covering the transport, protocol, and drive layers.
///
/// Lower layers never swallow errors: a `Frame` error raised by the codec
/// reaches the caller of a controller operation unchanged. Only
/// `SdoTimeout`-class failures are ever retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriveError {
    /// TCP session could not be established.
    #[error("connection to {addr} failed: {reason}")]
    Connection {
        /// Endpoint that refused or timed out.
        addr: String,
        /// Underlying failure description.
        reason: String,
    },

    /// I/O failure on an established link, or reconnection budget exhausted.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed frame: bad length field, wrong protocol id, or truncation.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Response does not correlate with the request (transaction id, object
    /// identity, or direction mismatch), or an access rule was violated.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Drive rejected the object read/write.
    #[error("drive aborted access to {object}: exception code 0x{code:02X}")]
    SdoAbort {
        /// Object the request addressed.
        object: String,
        /// Abort/exception code reported by the drive.
        code: u8,
    },

    /// No matching response arrived within the retry budget.
    #[error("timed out waiting for {object} after {attempts} attempt(s)")]
    SdoTimeout {
        /// Object the request addressed.
        object: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Drive did not reach the requested state within the hop/time budget.
    #[error("drive did not reach '{target}' within {waited_ms}ms")]
    StateTransitionTimeout {
        /// Target state or condition that was being waited for.
        target: String,
        /// Time spent waiting, in milliseconds.
        waited_ms: u64,
    },

    /// Drive reported a fault condition.
    #[error("drive fault, error code 0x{code:04X}")]
    DriveFault {
        /// Error code read from the drive after the fault was observed.
        code: u16,
    },
}

impl DriveError {
    /// Whether this error is transient and safe to retry with a fresh
    /// transaction id. Aborts and frame corruption are deliberately not
    /// retryable.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SdoTimeout { .. })
    }
}

/// Convenience alias for drive stack operations.
pub type DriveResult<T> = Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = DriveError::SdoAbort {
            object: "controlword (0x6040:00)".into(),
            code: 0x02,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x6040"), "message should name the object: {msg}");
        assert!(msg.contains("0x02"), "message should carry the code: {msg}");
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(DriveError::SdoTimeout {
            object: "statusword (0x6041:00)".into(),
            attempts: 1
        }
        .is_timeout());

        assert!(!DriveError::Transport("broken pipe".into()).is_timeout());
        assert!(!DriveError::SdoAbort {
            object: "x".into(),
            code: 1
        }
        .is_timeout());
        assert!(!DriveError::Frame("short".into()).is_timeout());
    }
}
