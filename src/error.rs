//! Error types for IEC 60870-5-104 protocol.

use thiserror::Error;

/// Result type alias for IEC 104 operations.
pub type Result<T> = std::result::Result<T, Iec104Error>;

/// Result returned by user handlers. Failures are logged, never fatal.
pub type HandlerResult = anyhow::Result<()>;

/// IEC 60870-5-104 protocol error types.
#[derive(Debug, Error)]
pub enum Iec104Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Link is not in the started data transfer state
    #[error("Not connected")]
    NotConnected,

    /// TCP/TLS dial did not complete within the connect timeout
    #[error("Connection timeout")]
    ConnectTimeout,

    /// STARTDT/STOPDT confirmation did not arrive in time
    #[error("Handshake timeout waiting for {0}")]
    HandshakeTimeout(&'static str),

    /// Send queue stayed full past the caller's deadline
    #[error("Send timeout: queue full")]
    SendTimeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid frame format
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Fewer than 6 ASDU header bytes
    #[error("Malformed ASDU header: {0} bytes")]
    MalformedHeader(usize),

    /// Declared objects do not fit in the remaining bytes
    #[error("Truncated ASDU payload: object {index} of {count}")]
    TruncatedPayload { index: usize, count: usize },

    /// Unknown type identifier
    #[error("Unknown type ID: {0}")]
    UnknownTypeId(u8),

    /// Unknown cause of transmission
    #[error("Unknown COT: {0}")]
    UnknownCot(u8),

    /// Field value outside its wire range, or inconsistent with the type id
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Sequence number mismatch
    #[error("Sequence number mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    /// Peer acknowledged a sequence number outside the unacknowledged window
    #[error("Acknowledge {ack} outside window [{low}, {high}]")]
    AckOutOfWindow { ack: u16, low: u16, high: u16 },

    /// T1 timeout (send confirmation or test frame reply)
    #[error("T1 timeout: no confirmation received")]
    T1Timeout,

    /// Too many unconfirmed frames
    #[error("Too many unconfirmed frames (K={0})")]
    TooManyUnconfirmed(u16),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reconnect budget exhausted
    #[error("Reconnect failed after {0} attempts")]
    RetriesExhausted(u32),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),
}

impl Iec104Error {
    /// Create a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(msg: impl Into<String>) -> Self {
        Self::InvalidField(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::NotConnected
                | Self::ConnectTimeout
                | Self::HandshakeTimeout(_)
                | Self::Io(_)
                | Self::Tls(_)
                | Self::T1Timeout
        )
    }

    /// Whether a failed connection attempt may be retried.
    ///
    /// Only a bad configuration ends the reconnect loop early.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::RetriesExhausted(_))
    }

    /// Whether an ASDU decode failure can be skipped without tearing down the link.
    pub fn is_skippable_asdu(&self) -> bool {
        matches!(self, Self::UnknownTypeId(_) | Self::UnknownCot(_))
    }

    /// Whether this error ends the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::NotConnected
                | Self::SendTimeout
                | Self::Config(_)
                | Self::UnknownTypeId(_)
                | Self::UnknownCot(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Iec104Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected");

        let err = Iec104Error::UnknownTypeId(255);
        assert_eq!(err.to_string(), "Unknown type ID: 255");

        let err = Iec104Error::SequenceMismatch {
            expected: 10,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Sequence number mismatch: expected 10, got 5"
        );

        let err = Iec104Error::AckOutOfWindow {
            ack: 9,
            low: 1,
            high: 4,
        };
        assert_eq!(err.to_string(), "Acknowledge 9 outside window [1, 4]");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Iec104Error::NotConnected.is_connection_error());
        assert!(Iec104Error::ConnectTimeout.is_connection_error());
        assert!(Iec104Error::T1Timeout.is_connection_error());
        assert!(!Iec104Error::UnknownTypeId(0).is_connection_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Iec104Error::ConnectTimeout.is_retryable());
        assert!(Iec104Error::HandshakeTimeout("STARTDT con").is_retryable());
        // peer hung up before STARTDT con
        assert!(Iec104Error::NotConnected.is_retryable());
        assert!(Iec104Error::Tls("handshake".into()).is_retryable());
        assert!(Iec104Error::protocol("unexpected U-frame").is_retryable());
        assert!(!Iec104Error::config("bad").is_retryable());
        assert!(!Iec104Error::RetriesExhausted(3).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Iec104Error::MalformedHeader(3).is_fatal());
        assert!(Iec104Error::T1Timeout.is_fatal());
        assert!(Iec104Error::AckOutOfWindow { ack: 0, low: 1, high: 2 }.is_fatal());
        assert!(!Iec104Error::UnknownTypeId(200).is_fatal());
        assert!(Iec104Error::UnknownCot(60).is_skippable_asdu());
        assert!(!Iec104Error::TruncatedPayload { index: 0, count: 1 }.is_skippable_asdu());
    }
}
