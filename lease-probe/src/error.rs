use lease_queue::QueueError;
use thiserror::Error;

/// Result type for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Failures that end a probe run
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Settings are missing or unusable; raised before any queue interaction
    #[error("Configuration error: {0}")]
    Config(String),

    /// The enqueue loop stopped at its first failed submission
    #[error("Failed to send message {sequence:03}: {source}")]
    Send {
        sequence: u32,
        #[source]
        source: QueueError,
    },

    #[error("Receive session failed: {0}")]
    Receive(String),
}

impl ProbeError {
    /// Process exit code for this failure. Usage errors exit with 2 from clap.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 3,
            Self::Send { .. } => 4,
            Self::Receive(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            ProbeError::Config("missing".into()).exit_code(),
            ProbeError::Send {
                sequence: 1,
                source: QueueError::Transport("down".into()),
            }
            .exit_code(),
            ProbeError::Receive("join".into()).exit_code(),
        ];
        assert_eq!(codes, [3, 4, 5]);
    }

    #[test]
    fn send_error_names_the_sequence() {
        let err = ProbeError::Send {
            sequence: 7,
            source: QueueError::Transport("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "Failed to send message 007: Transport error: connection reset"
        );
    }
}
