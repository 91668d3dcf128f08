//! Command routing and log decoding for embedded debug ports.
//!
//! A [`Router`] owns one packet link. It keeps at most one command in
//! flight, correlates the response by sequence number, times out commands
//! that never get an answer, and renders the target's log records as they
//! arrive.

pub mod command;
pub mod contract;
pub mod error;
pub mod log;
pub mod ping;
pub mod router;

pub use command::{expect_field, validate_response, Command, Rejection};
pub use contract::{
    opcode_name, CommandHeader, Severity, COMMAND_HEADER, ERROR_CODE_OK, LOG_RECORD,
    OPCODE_CEF_COMMAND_PROXY, OPCODE_DEBUG_PORT_ROUTER, OPCODE_INVALID, OPCODE_NONE, OPCODE_PING,
    PING_REQUEST, PING_RESPONSE,
};
pub use error::{Result, RouterError};
pub use log::{
    render_template, DecodedLog, FileLogSink, LogDecoder, LogDecoderConfig, LogRecord, LogSink,
    SequenceGap, TracingLogSink,
};
pub use ping::PingCommand;
pub use router::{
    CommandOutcome, CommandStatus, Router, RouterConfig, RouterState, RouterStatsSnapshot,
};
