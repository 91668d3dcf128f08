//! Single-flight command router.
//!
//! A [`Router`] owns one link. A dispatch thread drains the packet queue in
//! arrival order: command responses are matched against the one outstanding
//! command, log records go to the log sink, and anything else is a protocol
//! error. Callers send a command and block on its completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use debugport_frame::{
    FrameError, FrameStats, FrameStatsSnapshot, Packet, PacketSender, PacketTransport, PacketType,
};
use tracing::{debug, error, info, warn};

use crate::command::{validate_response, Command, Rejection};
use crate::error::{Result, RouterError};
use crate::log::{LogDecoder, LogDecoderConfig, LogSink};

/// Configuration for a [`Router`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long a sent command may wait for its response.
    pub response_timeout: Duration,
    /// How long a send may take to reach the driver.
    pub send_timeout: Duration,
    /// Dispatch loop wake-up interval; bounds how late a timeout is noticed.
    pub poll_interval: Duration,
    /// Rendering of target log records.
    pub log: LogDecoderConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            log: LogDecoderConfig::default(),
        }
    }
}

/// Command state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    AwaitingResponse,
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Rejected(Rejection),
    ResponseTimeout,
    SendTimeout,
}

impl CommandStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Rejected(_) => "rejected",
            CommandStatus::ResponseTimeout => "response-timeout",
            CommandStatus::SendTimeout => "send-timeout",
        }
    }
}

/// Result of one sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub sequence: u16,
    pub opcode: u16,
    pub status: CommandStatus,
    /// Time from send to completion.
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.status,
            CommandStatus::ResponseTimeout | CommandStatus::SendTimeout
        )
    }
}

/// Router counters.
#[derive(Debug, Default)]
struct RouterStats {
    commands_sent: AtomicU64,
    responses_accepted: AtomicU64,
    responses_rejected: AtomicU64,
    timeouts: AtomicU64,
    late_responses: AtomicU64,
    protocol_errors: AtomicU64,
    log_records: AtomicU64,
    log_rejections: AtomicU64,
    log_gaps: AtomicU64,
}

/// Point-in-time copy of the router counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub commands_sent: u64,
    pub responses_accepted: u64,
    pub responses_rejected: u64,
    /// Response and send timeouts.
    pub timeouts: u64,
    /// Responses that arrived while no command was pending.
    pub late_responses: u64,
    /// Command requests or unknown packet types from the target.
    pub protocol_errors: u64,
    pub log_records: u64,
    pub log_rejections: u64,
    /// Sequence gaps in the log record stream.
    pub log_gaps: u64,
}

impl RouterStats {
    fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            responses_accepted: self.responses_accepted.load(Ordering::Relaxed),
            responses_rejected: self.responses_rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            log_records: self.log_records.load(Ordering::Relaxed),
            log_rejections: self.log_rejections.load(Ordering::Relaxed),
            log_gaps: self.log_gaps.load(Ordering::Relaxed),
        }
    }
}

struct CommandState {
    state: RouterState,
    pending: Option<Box<dyn Command>>,
    last_send: Option<Instant>,
    sequence: u16,
    command_success: bool,
    timeout_occurred: bool,
    outcome: Option<CommandOutcome>,
    last_protocol_error: Option<String>,
    running: bool,
}

struct Shared {
    command: Mutex<CommandState>,
    completed: Condvar,
    stats: RouterStats,
    stop: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CommandState> {
        self.command
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the command stamped `sequence` to `Idle`. No-op if that command
    /// already completed, so each send completes exactly once.
    fn complete(&self, cmd: &mut CommandState, sequence: u16, status: CommandStatus) -> bool {
        if cmd.state != RouterState::AwaitingResponse || cmd.sequence != sequence {
            return false;
        }
        let opcode = cmd.pending.take().map(|pending| pending.opcode()).unwrap_or_default();
        let elapsed = cmd.last_send.map(|sent| sent.elapsed()).unwrap_or_default();

        cmd.command_success = status == CommandStatus::Success;
        cmd.timeout_occurred = matches!(
            status,
            CommandStatus::ResponseTimeout | CommandStatus::SendTimeout
        );
        match &status {
            CommandStatus::Success => {
                self.stats.responses_accepted.fetch_add(1, Ordering::Relaxed);
            }
            CommandStatus::Rejected(_) => {
                self.stats.responses_rejected.fetch_add(1, Ordering::Relaxed);
            }
            CommandStatus::ResponseTimeout | CommandStatus::SendTimeout => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
        cmd.state = RouterState::Idle;
        cmd.outcome = Some(CommandOutcome {
            sequence,
            opcode,
            status,
            elapsed,
        });
        self.completed.notify_all();
        true
    }
}

/// Routes commands and target logs over one link.
///
/// Dropping the router stops its dispatch thread and shuts the link down.
pub struct Router {
    shared: Arc<Shared>,
    sender: PacketSender,
    frame_stats: Arc<FrameStats>,
    config: RouterConfig,
    dispatch: Option<JoinHandle<()>>,
}

impl Router {
    /// Take ownership of `transport` and start dispatching.
    pub fn start<S: LogSink + 'static>(
        transport: PacketTransport,
        config: RouterConfig,
        sink: S,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            command: Mutex::new(CommandState {
                state: RouterState::Idle,
                pending: None,
                last_send: None,
                sequence: 0,
                command_success: false,
                timeout_occurred: false,
                outcome: None,
                last_protocol_error: None,
                running: true,
            }),
            completed: Condvar::new(),
            stats: RouterStats::default(),
            stop: AtomicBool::new(false),
        });
        let sender = transport.sender();
        let frame_stats = transport.stats_handle();

        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            transport,
            decoder: LogDecoder::new(config.log.clone()),
            sink: Box::new(sink),
            response_timeout: config.response_timeout,
            poll_interval: config.poll_interval,
        };
        let dispatch = thread::Builder::new()
            .name("debugport-router".to_string())
            .spawn(move || dispatcher.run())?;

        info!(
            response_timeout_ms = config.response_timeout.as_millis() as u64,
            send_timeout_ms = config.send_timeout.as_millis() as u64,
            "router started"
        );

        Ok(Self {
            shared,
            sender,
            frame_stats,
            config,
            dispatch: Some(dispatch),
        })
    }

    /// Send `command` and return the sequence number it was stamped with.
    ///
    /// Fails with [`RouterError::ResponsePending`] while another command is
    /// outstanding; nothing about that command changes. A send that does not
    /// reach the driver within the send timeout completes the command with
    /// [`CommandStatus::SendTimeout`] and still returns its sequence number.
    pub fn send<C: Command + 'static>(&self, command: C) -> Result<u16> {
        self.send_boxed(Box::new(command))
    }

    /// [`send`](Self::send) for an already boxed command.
    pub fn send_boxed(&self, mut command: Box<dyn Command>) -> Result<u16> {
        let (sequence, payload) = {
            let mut cmd = self.shared.lock();
            if !cmd.running {
                return Err(RouterError::Stopped("dispatch loop has exited".to_string()));
            }
            if cmd.state == RouterState::AwaitingResponse {
                warn!(pending = cmd.sequence, "cannot send, awaiting pending response");
                return Err(RouterError::ResponsePending {
                    sequence: cmd.sequence,
                });
            }

            let sequence = cmd.sequence.wrapping_add(1);
            command.set_sequence_number(sequence);
            let payload: Bytes = command.payload()?;

            debug!(
                command = command.name(),
                sequence,
                size = payload.len(),
                "sending command"
            );
            cmd.sequence = sequence;
            cmd.state = RouterState::AwaitingResponse;
            cmd.pending = Some(command);
            cmd.last_send = Some(Instant::now());
            cmd.command_success = false;
            cmd.timeout_occurred = false;
            cmd.outcome = None;
            (sequence, payload)
        };
        self.shared
            .stats
            .commands_sent
            .fetch_add(1, Ordering::Relaxed);

        match self
            .sender
            .send_with_timeout(payload, self.config.send_timeout)
        {
            Ok(()) => Ok(sequence),
            Err(FrameError::SendTimeout(waited)) => {
                warn!(sequence, waited_ms = waited.as_millis() as u64, "send timed out");
                let mut cmd = self.shared.lock();
                self.shared
                    .complete(&mut cmd, sequence, CommandStatus::SendTimeout);
                Ok(sequence)
            }
            Err(err) => {
                error!(sequence, error = %err, "send failed");
                let mut cmd = self.shared.lock();
                if cmd.state == RouterState::AwaitingResponse && cmd.sequence == sequence {
                    cmd.state = RouterState::Idle;
                    cmd.pending = None;
                    self.shared.completed.notify_all();
                }
                Err(err.into())
            }
        }
    }

    /// Block until the last sent command completes, at most `timeout`.
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<CommandOutcome> {
        let deadline = Instant::now() + timeout;
        let mut cmd = self.shared.lock();
        loop {
            if cmd.state == RouterState::Idle {
                return cmd.outcome.clone().ok_or(RouterError::Idle);
            }
            if !cmd.running {
                return Err(RouterError::Stopped(
                    "dispatch loop exited with a command pending".to_string(),
                ));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RouterError::Timeout(timeout));
            }
            cmd = self
                .shared
                .completed
                .wait_timeout(cmd, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    /// Send `command` and wait for its outcome.
    pub fn execute<C: Command + 'static>(&self, command: C) -> Result<CommandOutcome> {
        self.send(command)?;
        let bound =
            self.config.response_timeout + self.config.send_timeout + self.config.poll_interval * 4;
        self.wait_for_completion(bound)
    }

    /// Current command state.
    pub fn state(&self) -> RouterState {
        self.shared.lock().state
    }

    pub fn is_response_pending(&self) -> bool {
        self.state() == RouterState::AwaitingResponse
    }

    /// Whether the last completed command succeeded.
    pub fn command_success(&self) -> bool {
        self.shared.lock().command_success
    }

    /// Whether the last completed command timed out.
    pub fn timeout_occurred(&self) -> bool {
        self.shared.lock().timeout_occurred
    }

    /// Sequence number of the most recent send.
    pub fn sequence_number(&self) -> u16 {
        self.shared.lock().sequence
    }

    pub fn last_outcome(&self) -> Option<CommandOutcome> {
        self.shared.lock().outcome.clone()
    }

    /// Most recent protocol error reported by the dispatch loop.
    pub fn last_protocol_error(&self) -> Option<String> {
        self.shared.lock().last_protocol_error.clone()
    }

    /// Whether the dispatch loop is still running.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn frame_stats(&self) -> FrameStatsSnapshot {
        self.frame_stats.snapshot()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Stop the dispatch loop and shut the link down.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.dispatch.take() {
            if handle.join().is_err() {
                error!("router dispatch thread panicked");
            }
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// State owned by the dispatch thread.
struct Dispatcher {
    shared: Arc<Shared>,
    transport: PacketTransport,
    decoder: LogDecoder,
    sink: Box<dyn LogSink>,
    response_timeout: Duration,
    poll_interval: Duration,
}

impl Dispatcher {
    fn run(mut self) {
        while !self.shared.stop.load(Ordering::Acquire) {
            match self.transport.next_packet_timeout(self.poll_interval) {
                Ok(Some(packet)) => self.handle_packet(packet),
                Ok(None) => {}
                Err(FrameError::ConnectionClosed) => {
                    info!("link closed, router stopping");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "packet queue failed, router stopping");
                    break;
                }
            }
            self.check_response_timeout();
        }

        if let Err(err) = self.sink.flush() {
            warn!(error = %err, "failed to flush log sink");
        }
        self.transport.shutdown();
        let mut cmd = self.shared.lock();
        cmd.running = false;
        self.shared.completed.notify_all();
        debug!("router dispatch loop finished");
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet.packet_type() {
            Ok(PacketType::CommandResponse) => self.handle_response(&packet.payload),
            Ok(PacketType::LoggingData) => self.handle_log(&packet.payload),
            Ok(PacketType::CommandRequest) => {
                self.protocol_error("target sent a command request".to_string())
            }
            Err(err) => self.protocol_error(err.to_string()),
        }
    }

    fn handle_response(&mut self, payload: &Bytes) {
        let mut cmd = self.shared.lock();
        let Some(command) = cmd.pending.as_deref() else {
            warn!(
                size = payload.len(),
                "command response with no command pending, dropped"
            );
            self.shared
                .stats
                .late_responses
                .fetch_add(1, Ordering::Relaxed);
            return;
        };

        let status = match validate_response(command, payload) {
            Ok(()) => {
                debug!(command = command.name(), sequence = cmd.sequence, "response accepted");
                CommandStatus::Success
            }
            Err(rejection) => {
                warn!(
                    command = command.name(),
                    sequence = cmd.sequence,
                    reason = %rejection,
                    "response rejected"
                );
                CommandStatus::Rejected(rejection)
            }
        };
        let sequence = cmd.sequence;
        self.shared.complete(&mut cmd, sequence, status);
    }

    fn handle_log(&mut self, payload: &Bytes) {
        let decoded = match self.decoder.decode(payload) {
            Ok(decoded) => decoded,
            Err(rejection) => {
                warn!(reason = %rejection, "log record rejected");
                self.shared
                    .stats
                    .log_rejections
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.shared
            .stats
            .log_records
            .fetch_add(1, Ordering::Relaxed);
        if decoded.gap.is_some() {
            self.shared.stats.log_gaps.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.sink.discontinuity() {
                warn!(error = %err, "failed to write log discontinuity");
            }
        }
        if let Err(err) = self.sink.write(decoded.level, &decoded.line) {
            warn!(error = %err, "failed to write log record");
        }
    }

    fn protocol_error(&mut self, message: String) {
        error!(error = %message, "protocol error");
        self.shared
            .stats
            .protocol_errors
            .fetch_add(1, Ordering::Relaxed);
        self.shared.lock().last_protocol_error = Some(message);
    }

    fn check_response_timeout(&mut self) {
        let mut cmd = self.shared.lock();
        if cmd.state != RouterState::AwaitingResponse {
            return;
        }
        let Some(sent) = cmd.last_send else {
            return;
        };
        if sent.elapsed() > self.response_timeout {
            let sequence = cmd.sequence;
            warn!(
                sequence,
                timeout_ms = self.response_timeout.as_millis() as u64,
                "response timed out"
            );
            self.shared
                .complete(&mut cmd, sequence, CommandStatus::ResponseTimeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use debugport_frame::{DebugPortHeader, PacketReader, PacketWriter, TransportConfig};
    use debugport_transport::{send_all, DebugPortDriver, MemoryPort};

    use super::*;
    use crate::contract::{CommandHeader, Severity, OPCODE_PING, PING_REQUEST, PING_RESPONSE};
    use crate::log::tests::record_payload;
    use crate::ping::PingCommand;

    #[derive(Clone, Default)]
    struct MemorySink {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl MemorySink {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LogSink for MemorySink {
        fn write(&mut self, level: Severity, line: &str) -> std::io::Result<()> {
            self.lines
                .lock()
                .unwrap()
                .push(format!("{}, {line}", level.name()));
            Ok(())
        }

        fn discontinuity(&mut self) -> std::io::Result<()> {
            self.lines.lock().unwrap().push("BREAK".to_string());
            Ok(())
        }
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            response_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            ..RouterConfig::default()
        }
    }

    /// A correct ping response for `request`.
    fn ping_reply(request: &[u8]) -> Bytes {
        let fields = PING_REQUEST.decode(request).unwrap();
        let offset = fields.get("offset_to_add_to_response").unwrap();
        let mut header = CommandHeader::decode(request).unwrap();
        header.num_bytes = PING_RESPONSE.size as u32;
        let mut builder = PING_RESPONSE.builder().prefix(&header.to_bytes());
        for name in ["uint8_value", "uint16_value", "uint32_value", "uint64_value"] {
            builder = builder
                .uint(name, fields.get(name).unwrap().wrapping_add(offset))
                .unwrap();
        }
        builder
            .uint("test_value", fields.get("test_value").unwrap())
            .unwrap()
            .build()
    }

    /// Simulated target: answers each command request with `respond`.
    fn spawn_target<F>(port: MemoryPort, mut respond: F)
    where
        F: FnMut(&Bytes) -> Option<Bytes> + Send + 'static,
    {
        thread::spawn(move || {
            let mut reader = PacketReader::new(port.clone());
            let mut writer = PacketWriter::new(port);
            while let Ok(packet) = reader.read_packet() {
                if let Some(reply) = respond(&packet.payload) {
                    if writer
                        .send_packet(PacketType::CommandResponse, &reply)
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });
    }

    fn start_router<F>(config: RouterConfig, respond: F) -> (Router, MemoryPort, MemorySink)
    where
        F: FnMut(&Bytes) -> Option<Bytes> + Send + 'static,
    {
        let (host, target) = MemoryPort::pair();
        spawn_target(target.clone(), respond);
        let transport = PacketTransport::start(host, TransportConfig::default()).unwrap();
        let sink = MemorySink::default();
        let router = Router::start(transport, config, sink.clone()).unwrap();
        (router, target, sink)
    }

    fn echo_target(request: &Bytes) -> Option<Bytes> {
        Some(ping_reply(request))
    }

    fn silent_target(_request: &Bytes) -> Option<Bytes> {
        None
    }

    fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(Instant::now() < deadline, "condition never became true");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn ping_round_trip_succeeds() {
        let (router, _target, _sink) = start_router(fast_config(), echo_target);

        let outcome = router.execute(PingCommand::new()).unwrap();
        assert_eq!(outcome.status, CommandStatus::Success);
        assert_eq!(outcome.sequence, 1);
        assert_eq!(outcome.opcode, OPCODE_PING);
        assert!(router.command_success());
        assert!(!router.timeout_occurred());
        assert!(!router.is_response_pending());
        assert_eq!(router.stats().responses_accepted, 1);
    }

    #[test]
    fn ping_with_offset_and_test_value_succeeds() {
        let (router, _target, _sink) = start_router(fast_config(), echo_target);
        let ping = PingCommand::new()
            .with_offset(0x0101_0101_0101_0101)
            .with_test_value(0xCAFE_F00D);
        assert!(router.execute(ping).unwrap().is_success());
    }

    #[test]
    fn corrupted_echo_fails() {
        let (router, _target, _sink) = start_router(fast_config(), |request: &Bytes| {
            let mut reply = ping_reply(request).to_vec();
            reply[18] ^= 0x01;
            Some(Bytes::from(reply))
        });

        let outcome = router.execute(PingCommand::new()).unwrap();
        assert!(matches!(
            outcome.status,
            CommandStatus::Rejected(Rejection::FieldMismatch {
                field: "uint16_value",
                ..
            })
        ));
        assert!(!router.command_success());
        assert!(!router.timeout_occurred());
        assert_eq!(router.stats().responses_rejected, 1);
    }

    #[test]
    fn short_response_fails_on_length() {
        let (router, _target, _sink) = start_router(fast_config(), |request: &Bytes| {
            Some(ping_reply(request).slice(..32))
        });

        let outcome = router.execute(PingCommand::new()).unwrap();
        assert_eq!(
            outcome.status,
            CommandStatus::Rejected(Rejection::LengthMismatch {
                expected: 40,
                actual: 32
            })
        );
    }

    #[test]
    fn second_send_while_pending_is_rejected() {
        let (router, _target, _sink) = start_router(fast_config(), silent_target);

        assert_eq!(router.send(PingCommand::new()).unwrap(), 1);
        let sent_at = router.shared.lock().last_send;

        let err = router.send(PingCommand::new()).unwrap_err();
        assert!(matches!(err, RouterError::ResponsePending { sequence: 1 }));

        {
            let cmd = router.shared.lock();
            assert_eq!(cmd.sequence, 1);
            assert_eq!(cmd.last_send, sent_at);
            assert_eq!(cmd.state, RouterState::AwaitingResponse);
            assert_eq!(cmd.pending.as_ref().unwrap().sequence_number(), 1);
        }
        assert_eq!(router.stats().commands_sent, 1);
    }

    #[test]
    fn sequence_numbers_increase_by_one() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let (router, _target, _sink) = start_router(fast_config(), move |request: &Bytes| {
            let header = CommandHeader::decode(request).unwrap();
            seen_tx.send(header.sequence_number).unwrap();
            Some(ping_reply(request))
        });

        let outcomes: Vec<u16> = (0..5)
            .map(|_| router.execute(PingCommand::new()).unwrap().sequence)
            .collect();
        assert_eq!(outcomes, vec![1, 2, 3, 4, 5]);

        let on_wire: Vec<u16> = seen_rx.try_iter().collect();
        assert_eq!(on_wire, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sequence_number_wraps() {
        let (router, _target, _sink) = start_router(fast_config(), echo_target);
        router.shared.lock().sequence = u16::MAX - 1;

        assert_eq!(router.execute(PingCommand::new()).unwrap().sequence, u16::MAX);
        let wrapped = router.execute(PingCommand::new()).unwrap();
        assert_eq!(wrapped.sequence, 0);
        assert!(wrapped.is_success());
    }

    #[test]
    fn response_timeout_completes_once() {
        let (router, _target, _sink) = start_router(fast_config(), silent_target);

        router.send(PingCommand::new()).unwrap();
        let outcome = router.wait_for_completion(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome.status, CommandStatus::ResponseTimeout);
        assert!(outcome.elapsed >= Duration::from_millis(200));
        assert!(router.timeout_occurred());
        assert!(!router.command_success());
        assert_eq!(router.state(), RouterState::Idle);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(router.stats().timeouts, 1);
        assert_eq!(router.last_outcome(), Some(outcome));
    }

    #[test]
    fn router_is_usable_after_timeout() {
        let mut first = true;
        let (router, _target, _sink) = start_router(fast_config(), move |request: &Bytes| {
            if std::mem::take(&mut first) {
                None
            } else {
                Some(ping_reply(request))
            }
        });

        assert!(router.execute(PingCommand::new()).unwrap().is_timeout());
        let outcome = router.execute(PingCommand::new()).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.sequence, 2);
        assert!(!router.timeout_occurred());
    }

    #[test]
    fn late_response_is_dropped() {
        let (router, _target, _sink) = start_router(fast_config(), |request: &Bytes| {
            thread::sleep(Duration::from_millis(350));
            Some(ping_reply(request))
        });

        let outcome = router.execute(PingCommand::new()).unwrap();
        assert_eq!(outcome.status, CommandStatus::ResponseTimeout);

        eventually(|| router.stats().late_responses == 1);
        assert_eq!(
            router.last_outcome().unwrap().status,
            CommandStatus::ResponseTimeout
        );
        assert!(!router.command_success());
    }

    #[test]
    fn stalled_send_times_out() {
        let (host, target) = MemoryPort::pair();
        spawn_target(target, echo_target);
        host.stall_writes();
        let transport = PacketTransport::start(host, TransportConfig::default()).unwrap();
        let config = RouterConfig {
            send_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let router = Router::start(transport, config, MemorySink::default()).unwrap();

        let started = Instant::now();
        assert_eq!(router.send(PingCommand::new()).unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));

        let outcome = router.wait_for_completion(Duration::ZERO).unwrap();
        assert_eq!(outcome.status, CommandStatus::SendTimeout);
        assert!(router.timeout_occurred());
        assert!(!router.command_success());
        assert!(!router.is_response_pending());
    }

    #[test]
    fn logs_are_delivered_while_command_pending() {
        let (router, target, sink) = start_router(fast_config(), silent_target);
        router.send(PingCommand::new()).unwrap();

        let mut target_writer = PacketWriter::new(target);
        target_writer
            .send_packet(
                PacketType::LoggingData,
                &record_payload(0, "a={:X} b={:X}", [100, 200, 0]),
            )
            .unwrap();
        target_writer
            .send_packet(PacketType::LoggingData, &record_payload(2, "skip", [0; 3]))
            .unwrap();

        eventually(|| sink.lines().len() == 3);
        assert!(router.is_response_pending());

        let lines = sink.lines();
        assert!(lines[0].starts_with("INFO, 0, 12345, a=64 b=C8, main.cpp:400, 1, "));
        assert_eq!(lines[1], "BREAK");
        assert!(lines[2].starts_with("INFO, 2, 12345, skip, "));

        let stats = router.stats();
        assert_eq!(stats.log_records, 2);
        assert_eq!(stats.log_gaps, 1);
    }

    #[test]
    fn malformed_log_is_rejected() {
        let (router, target, sink) = start_router(fast_config(), silent_target);
        PacketWriter::new(target)
            .send_packet(PacketType::LoggingData, b"too short")
            .unwrap();

        eventually(|| router.stats().log_rejections == 1);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn unknown_packet_type_is_a_protocol_error() {
        let (router, mut target, _sink) = start_router(fast_config(), silent_target);

        let payload = b"??";
        let mut header = DebugPortHeader::for_payload(payload, PacketType::LoggingData);
        header.packet_type = 7;
        header.header_checksum = header.compute_header_checksum();
        let mut wire = header.to_bytes().to_vec();
        wire.extend_from_slice(payload);
        send_all(&mut target, &wire).unwrap();

        eventually(|| router.stats().protocol_errors == 1);
        let message = router.last_protocol_error().unwrap();
        assert!(message.contains("unknown packet type"), "{message}");
        assert!(router.is_running());
    }

    #[test]
    fn command_request_from_target_is_a_protocol_error() {
        let (router, target, _sink) = start_router(fast_config(), silent_target);
        PacketWriter::new(target).send(b"nope").unwrap();

        eventually(|| router.stats().protocol_errors == 1);
        assert!(router.last_protocol_error().unwrap().contains("command request"));
    }

    #[test]
    fn unsolicited_response_is_dropped() {
        let (router, target, _sink) = start_router(fast_config(), silent_target);
        let mut ping = PingCommand::new();
        ping.set_sequence_number(1);
        let reply = ping_reply(&ping.payload().unwrap());
        PacketWriter::new(target)
            .send_packet(PacketType::CommandResponse, &reply)
            .unwrap();

        eventually(|| router.stats().late_responses == 1);
        assert_eq!(router.state(), RouterState::Idle);
        assert!(router.last_outcome().is_none());
    }

    #[test]
    fn waiting_with_nothing_sent_fails() {
        let (router, _target, _sink) = start_router(fast_config(), silent_target);
        assert!(matches!(
            router.wait_for_completion(Duration::from_millis(10)),
            Err(RouterError::Idle)
        ));
    }

    #[test]
    fn closed_link_stops_the_router() {
        let (router, mut target, _sink) = start_router(fast_config(), silent_target);
        target.close().unwrap();

        eventually(|| !router.is_running());
        assert!(matches!(
            router.send(PingCommand::new()),
            Err(RouterError::Stopped(_))
        ));
    }
}
