use std::time::Duration;

/// Errors that can occur in router operations.
///
/// Protocol-level failures of a command (bad echo, wrong sequence number)
/// are not errors; they are reported as a [`Rejection`](crate::Rejection)
/// in the command outcome.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Link failure, including driver errors wrapped by the frame layer.
    #[error("frame error: {0}")]
    Frame(#[from] debugport_frame::FrameError),

    /// A command is already awaiting its response.
    #[error("cannot send, awaiting response to command {sequence}")]
    ResponsePending { sequence: u16 },

    /// No command has completed within the wait.
    #[error("no command completed within {0:?}")]
    Timeout(Duration),

    /// There is no command to wait for.
    #[error("no command has been sent")]
    Idle,

    /// The dispatch loop has stopped.
    #[error("router stopped: {0}")]
    Stopped(String),

    /// I/O failure outside the link (thread spawn, log file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use debugport_frame::FrameError;
    use debugport_transport::TransportError;

    use super::*;

    #[test]
    fn driver_errors_arrive_through_the_frame_layer() {
        let err = RouterError::from(FrameError::from(TransportError::Closed));
        assert!(matches!(
            err,
            RouterError::Frame(FrameError::Transport(TransportError::Closed))
        ));
        assert_eq!(err.to_string(), "frame error: transport error: port closed");
    }
}
