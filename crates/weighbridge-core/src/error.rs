// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Weighbridge.

use thiserror::Error;

/// Top-level error type for all Weighbridge operations.
#[derive(Debug, Error)]
pub enum WeighbridgeError {
    // -- Device link --
    #[error("device transport error: {0}")]
    Device(String),

    // -- Distribution --
    #[error("subscriber delivery failed: {0}")]
    Subscriber(String),

    // -- Print queue --
    #[error("document is empty")]
    EmptyDocument,

    #[error("history archive failed: {0}")]
    History(String),

    #[error("temporary artifact failed: {0}")]
    TempArtifact(String),

    #[error("could not start print executable: {0}")]
    PrintSpawn(String),

    #[error("print executable failed: {0}")]
    PrintFailed(String),

    // -- Front end --
    #[error("server error: {0}")]
    Server(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    // -- Setup --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WeighbridgeError>;

/// Containment class of an error.
///
/// Everything except [`ErrorClass::Foundational`] stays local to one unit of
/// work (one connection attempt, one subscriber, one job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Device open/read failure; retried with backoff.
    TransientIo,
    /// Unparseable input; logged and dropped.
    ProtocolNoise,
    /// Slow or disconnected subscriber; evicted.
    SubscriberFault,
    /// Failure recorded on a single print job; the queue continues.
    JobFault,
    /// Cannot bind, cannot create directories, cannot read configuration.
    Foundational,
}

impl WeighbridgeError {
    /// Classify this error for propagation decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Device(_) => ErrorClass::TransientIo,
            Self::Subscriber(_) => ErrorClass::SubscriberFault,
            Self::EmptyDocument
            | Self::History(_)
            | Self::TempArtifact(_)
            | Self::PrintSpawn(_)
            | Self::PrintFailed(_) => ErrorClass::JobFault,
            Self::BadRequest(_) => ErrorClass::ProtocolNoise,
            Self::Server(_) | Self::Config(_) => ErrorClass::Foundational,
            Self::Serialization(_) => ErrorClass::ProtocolNoise,
            Self::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::AddrInUse
                | std::io::ErrorKind::AddrNotAvailable
                | std::io::ErrorKind::PermissionDenied => ErrorClass::Foundational,
                _ => ErrorClass::TransientIo,
            },
        }
    }

    /// Whether this error must bring the process down.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Foundational
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_transient() {
        let err = WeighbridgeError::Device("no such file".into());
        assert_eq!(err.class(), ErrorClass::TransientIo);
        assert!(!err.is_fatal());
    }

    #[test]
    fn print_failures_stay_on_the_job() {
        for err in [
            WeighbridgeError::PrintFailed("exit status 1".into()),
            WeighbridgeError::PrintSpawn("not found".into()),
            WeighbridgeError::History("disk full".into()),
        ] {
            assert_eq!(err.class(), ErrorClass::JobFault);
        }
    }

    #[test]
    fn bind_failure_is_fatal() {
        let err = WeighbridgeError::Io(std::io::Error::from(std::io::ErrorKind::AddrInUse));
        assert!(err.is_fatal());
        assert!(WeighbridgeError::Config("bad json".into()).is_fatal());
    }
}
