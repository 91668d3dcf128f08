use std::fmt;
use std::io;

use debugport_frame::FrameError;
use debugport_router::{CommandStatus, RouterError};
use debugport_transport::TransportError;

// Exit codes follow sysexits / timeout(1) conventions.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { ref source, .. } | TransportError::Configure { ref source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        TransportError::UnsupportedBaudRate(_) => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::SendTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::ConnectionClosed | FrameError::Shutdown => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn router_error(context: &str, err: RouterError) -> CliError {
    match err {
        RouterError::Frame(err) => frame_error(context, err),
        RouterError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RouterError::ResponsePending { .. } | RouterError::Idle => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        RouterError::Stopped(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        RouterError::Io(source) => io_error(context, source),
    }
}

/// Exit code for a finished command.
pub fn status_code(status: &CommandStatus) -> i32 {
    match status {
        CommandStatus::Success => SUCCESS,
        CommandStatus::Rejected(_) => DATA_INVALID,
        CommandStatus::ResponseTimeout | CommandStatus::SendTimeout => TIMEOUT,
    }
}
