//! Target log records: decoding, rendering and sinks.
//!
//! A log record is a fixed 224-byte struct carrying a printf-like template,
//! up to three integer variables and source location. The decoder fills
//! the template, composes one comma-joined line per record and tracks the
//! record sequence number to spot dropped records.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use debugport_frame::LOG_RECORD_SIZE;
use tracing::{debug, error, info, warn};

use crate::command::Rejection;
use crate::contract::{CommandHeader, Severity, ERROR_CODE_OK, LOG_RECORD};

/// Placeholder written by the firmware's logging macros.
pub const DEFAULT_PLACEHOLDER: &str = "{:X}";

/// Number of integer variables a record carries.
pub const LOG_VARIABLES: usize = 3;

/// Configuration for rendering log records.
#[derive(Debug, Clone)]
pub struct LogDecoderConfig {
    /// Render variables as uppercase hex (default) instead of decimal.
    pub hex_variables: bool,
    /// Token replaced by each variable in turn.
    pub placeholder: String,
}

impl Default for LogDecoderConfig {
    fn default() -> Self {
        Self {
            hex_variables: true,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub header: CommandHeader,
    pub variables: [u64; LOG_VARIABLES],
    pub timestamp: u64,
    pub template: String,
    pub filename: String,
    pub line_number: u32,
    pub sequence_number: u16,
    pub module_id: u8,
    /// Raw severity code; see [`LogRecord::severity`].
    pub severity: u8,
    /// The record exactly as received.
    pub raw: Bytes,
}

impl LogRecord {
    /// Decode and validate a logging-data payload.
    ///
    /// The payload must be exactly one record, and its embedded header must
    /// carry the record size and an OK error code.
    pub fn decode(payload: &Bytes) -> Result<Self, Rejection> {
        if payload.len() != LOG_RECORD_SIZE {
            return Err(Rejection::LengthMismatch {
                expected: LOG_RECORD_SIZE,
                actual: payload.len(),
            });
        }

        let header = CommandHeader::decode(payload)?;
        if header.num_bytes as usize != LOG_RECORD_SIZE {
            return Err(Rejection::FieldMismatch {
                field: "num_bytes",
                expected: LOG_RECORD_SIZE as u64,
                received: u64::from(header.num_bytes),
            });
        }
        if header.error_code != ERROR_CODE_OK {
            return Err(Rejection::ErrorCode(header.error_code));
        }

        let fields = LOG_RECORD.decode(payload)?;
        let uint = |name: &'static str| fields.get(name).ok_or(Rejection::MissingField(name));

        Ok(Self {
            header,
            variables: [uint("variable1")?, uint("variable2")?, uint("variable3")?],
            timestamp: uint("timestamp")?,
            template: c_string(LOG_RECORD.bytes_of(payload, "template")?),
            filename: c_string(LOG_RECORD.bytes_of(payload, "filename")?),
            line_number: uint("line_number")? as u32,
            sequence_number: uint("log_sequence_number")? as u16,
            module_id: uint("module_id")? as u8,
            severity: uint("severity")? as u8,
            raw: payload.clone(),
        })
    }

    /// Decoded severity, or the raw code if it is not a known level.
    pub fn severity(&self) -> Result<Severity, u8> {
        Severity::try_from(self.severity)
    }
}

/// Text up to the first NUL, or the whole field if it is full.
fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Fill `template` with `variables`.
///
/// A template whose `{` and `}` counts differ is returned unchanged.
/// Otherwise each placeholder, left to right, takes the next variable until
/// the variables run out.
pub fn render_template(template: &str, variables: &[u64], config: &LogDecoderConfig) -> String {
    let open = template.matches('{').count();
    let close = template.matches('}').count();
    if open != close || config.placeholder.is_empty() {
        return template.to_string();
    }

    let mut rendered = template.to_string();
    for value in variables.iter().take(open) {
        let text = if config.hex_variables {
            format!("{value:X}")
        } else {
            value.to_string()
        };
        rendered = rendered.replacen(config.placeholder.as_str(), &text, 1);
    }
    rendered
}

/// A hole in the record sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub expected: u16,
    pub received: u16,
}

/// One rendered record, ready for a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub record: LogRecord,
    /// Level to write at. Unknown codes are promoted to error.
    pub level: Severity,
    pub line: String,
    pub gap: Option<SequenceGap>,
}

/// Turns logging-data payloads into rendered lines.
#[derive(Debug)]
pub struct LogDecoder {
    config: LogDecoderConfig,
    expected_sequence: u16,
    dropped: u64,
    processed: u64,
}

impl Default for LogDecoder {
    fn default() -> Self {
        Self::new(LogDecoderConfig::default())
    }
}

impl LogDecoder {
    pub fn new(config: LogDecoderConfig) -> Self {
        Self {
            config,
            expected_sequence: 0,
            dropped: 0,
            processed: 0,
        }
    }

    /// Decode, check continuity and render one payload.
    ///
    /// The expected sequence number advances by one for every accepted
    /// record, gap or not, so a repeated or reordered record keeps being
    /// reported. Rejected payloads do not advance it.
    pub fn decode(&mut self, payload: &Bytes) -> Result<DecodedLog, Rejection> {
        let record = LogRecord::decode(payload)?;

        let gap = (record.sequence_number != self.expected_sequence).then(|| SequenceGap {
            expected: self.expected_sequence,
            received: record.sequence_number,
        });
        if let Some(gap) = gap {
            self.dropped += 1;
            warn!(
                received = gap.received,
                expected = gap.expected,
                "log sequence number gap"
            );
        }

        let level = record.severity().unwrap_or_else(|code| {
            warn!(severity = code, "unknown log severity, writing at error level");
            Severity::Error
        });
        let line = self.compose(&record);

        self.expected_sequence = self.expected_sequence.wrapping_add(1);
        self.processed += 1;

        Ok(DecodedLog {
            record,
            level,
            line,
            gap,
        })
    }

    /// `sequence, timestamp, rendered, file:line, module, rawhex`
    fn compose(&self, record: &LogRecord) -> String {
        let rendered = render_template(&record.template, &record.variables, &self.config);
        let raw = record.raw.iter().fold(
            String::with_capacity(record.raw.len() * 2),
            |mut out, byte| {
                let _ = write!(out, "{byte:02X}");
                out
            },
        );
        [
            record.sequence_number.to_string(),
            record.timestamp.to_string(),
            rendered,
            format!("{}:{}", record.filename, record.line_number),
            record.module_id.to_string(),
            raw,
        ]
        .join(", ")
    }

    /// Sequence number the next record should carry.
    pub fn expected_sequence(&self) -> u16 {
        self.expected_sequence
    }

    /// Gaps seen so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Records accepted so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn config(&self) -> &LogDecoderConfig {
        &self.config
    }
}

/// Destination for rendered log lines.
pub trait LogSink: Send {
    /// Write one rendered line at `level`.
    fn write(&mut self, level: Severity, line: &str) -> io::Result<()>;

    /// Mark a break in the record sequence.
    fn discontinuity(&mut self) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write(&mut self, level: Severity, line: &str) -> io::Result<()> {
        (**self).write(level, line)
    }

    fn discontinuity(&mut self) -> io::Result<()> {
        (**self).discontinuity()
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Re-emits target log lines as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&mut self, level: Severity, line: &str) -> io::Result<()> {
        match level {
            Severity::Debug => debug!(target: "debugport::target", "{line}"),
            Severity::Info => info!(target: "debugport::target", "{line}"),
            Severity::Warning => warn!(target: "debugport::target", "{line}"),
            Severity::Error => error!(target: "debugport::target", "{line}"),
            Severity::Fatal => error!(target: "debugport::target", fatal = true, "{line}"),
        }
        Ok(())
    }

    fn discontinuity(&mut self) -> io::Result<()> {
        warn!(target: "debugport::target", "log records missing");
        Ok(())
    }
}

/// Line written to a log file where records went missing.
pub const DISCONTINUITY_MARKER: &str =
    "---------------------------------------------------------------------------------------------";

/// Appends `LEVEL, line` entries to a file.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    file: File,
}

impl FileLogSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn write(&mut self, level: Severity, line: &str) -> io::Result<()> {
        writeln!(self.file, "{}, {line}", level.name())
    }

    fn discontinuity(&mut self) -> io::Result<()> {
        writeln!(self.file, "{DISCONTINUITY_MARKER}")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use debugport_frame::WIRE_ENDIAN;

    use super::*;

    /// Encode a log record payload as the target would.
    pub(crate) fn record_payload(sequence: u16, template: &str, variables: [u64; 3]) -> Bytes {
        let header = CommandHeader {
            opcode: 0,
            sequence_number: 0,
            error_code: ERROR_CODE_OK,
            num_bytes: LOG_RECORD_SIZE as u32,
        };
        LOG_RECORD
            .builder()
            .prefix(&header.to_bytes())
            .uint("variable1", variables[0])
            .unwrap()
            .uint("variable2", variables[1])
            .unwrap()
            .uint("variable3", variables[2])
            .unwrap()
            .uint("timestamp", 12345)
            .unwrap()
            .bytes("template", template.as_bytes())
            .unwrap()
            .bytes("filename", b"main.cpp")
            .unwrap()
            .uint("line_number", 400)
            .unwrap()
            .uint("log_sequence_number", u64::from(sequence))
            .unwrap()
            .uint("module_id", 1)
            .unwrap()
            .uint("severity", 1)
            .unwrap()
            .build()
    }

    #[test]
    fn hex_substitution() {
        let config = LogDecoderConfig::default();
        assert_eq!(
            render_template("a={:X} b={:X}", &[100, 200, 0], &config),
            "a=64 b=C8"
        );
    }

    #[test]
    fn decimal_substitution() {
        let config = LogDecoderConfig {
            hex_variables: false,
            ..LogDecoderConfig::default()
        };
        assert_eq!(
            render_template("a={:X} b={:X}", &[100, 200, 0], &config),
            "a=100 b=200"
        );
    }

    #[test]
    fn mismatched_braces_render_verbatim() {
        let config = LogDecoderConfig::default();
        assert_eq!(
            render_template("broken {:X", &[1, 2, 3], &config),
            "broken {:X"
        );
    }

    #[test]
    fn at_most_three_variables_are_substituted() {
        let config = LogDecoderConfig::default();
        assert_eq!(
            render_template("{:X} {:X} {:X} {:X}", &[1, 2, 3], &config),
            "1 2 3 {:X}"
        );
    }

    #[test]
    fn record_fields_are_decoded() {
        let payload = record_payload(7, "x={:X}", [0xAB, 0, 0]);
        let record = LogRecord::decode(&payload).unwrap();

        assert_eq!(record.sequence_number, 7);
        assert_eq!(record.template, "x={:X}");
        assert_eq!(record.filename, "main.cpp");
        assert_eq!(record.line_number, 400);
        assert_eq!(record.timestamp, 12345);
        assert_eq!(record.module_id, 1);
        assert_eq!(record.severity(), Ok(Severity::Info));
        assert_eq!(record.variables, [0xAB, 0, 0]);
    }

    /// A record as the firmware sends it: the embedded command header keeps
    /// sequence 0 and the log sequence sits at bytes 220..222.
    fn firmware_record(header_sequence: u16, log_sequence: u16) -> Bytes {
        let mut raw = record_payload(0, "tick", [0; 3]).to_vec();
        let mut header = CommandHeader::new(0, LOG_RECORD_SIZE);
        header.sequence_number = header_sequence;
        raw[..16].copy_from_slice(&header.to_bytes());
        WIRE_ENDIAN.put_uint(&mut &mut raw[220..222], u64::from(log_sequence), 2);
        Bytes::from(raw)
    }

    #[test]
    fn sequence_comes_from_record_body_not_header() {
        let record = LogRecord::decode(&firmware_record(0x55, 3)).unwrap();
        assert_eq!(record.sequence_number, 3);
        assert_eq!(record.header.sequence_number, 0x55);
    }

    #[test]
    fn firmware_records_in_order_report_no_gap() {
        let mut decoder = LogDecoder::default();
        let first = decoder.decode(&firmware_record(0, 0)).unwrap();
        let second = decoder.decode(&firmware_record(0, 1)).unwrap();

        assert_eq!(second.record.sequence_number, 1);
        assert!(first.gap.is_none());
        assert!(second.gap.is_none());
        assert_eq!(decoder.dropped(), 0);
    }

    #[test]
    fn helper_records_carry_sequence_in_body() {
        let raw = record_payload(5, "x", [0; 3]);
        assert_eq!(&raw[2..4], &[0, 0]);
        assert_eq!(WIRE_ENDIAN.get_uint(&raw[220..222]), 5);
    }

    #[test]
    fn full_template_field_has_no_terminator() {
        let template = "y".repeat(128);
        let payload = record_payload(0, &template, [0; 3]);
        assert_eq!(LogRecord::decode(&payload).unwrap().template, template);
    }

    #[test]
    fn composed_line_layout() {
        let mut decoder = LogDecoder::default();
        let payload = record_payload(0, "a={:X} b={:X}", [100, 200, 0]);
        let decoded = decoder.decode(&payload).unwrap();

        let fields: Vec<&str> = decoded.line.splitn(6, ", ").collect();
        assert_eq!(fields[0], "0");
        assert_eq!(fields[1], "12345");
        assert_eq!(fields[2], "a=64 b=C8");
        assert_eq!(fields[3], "main.cpp:400");
        assert_eq!(fields[4], "1");
        assert_eq!(fields[5].len(), LOG_RECORD_SIZE * 2);
        assert_eq!(decoded.level, Severity::Info);
        assert!(decoded.gap.is_none());
    }

    #[test]
    fn gap_is_reported_and_counter_advances_by_one() {
        let mut decoder = LogDecoder::default();

        let first = decoder.decode(&record_payload(0, "first", [0; 3])).unwrap();
        assert!(first.gap.is_none());

        let second = decoder.decode(&record_payload(2, "second", [0; 3])).unwrap();
        assert_eq!(
            second.gap,
            Some(SequenceGap {
                expected: 1,
                received: 2
            })
        );
        assert_eq!(decoder.expected_sequence(), 2);
        assert_eq!(decoder.dropped(), 1);
        assert_eq!(decoder.processed(), 2);
    }

    #[test]
    fn repeated_record_keeps_reporting() {
        let mut decoder = LogDecoder::default();
        decoder.decode(&record_payload(0, "a", [0; 3])).unwrap();
        let again = decoder.decode(&record_payload(0, "a", [0; 3])).unwrap();
        let third = decoder.decode(&record_payload(0, "a", [0; 3])).unwrap();
        assert!(again.gap.is_some());
        assert!(third.gap.is_some());
        assert_eq!(decoder.dropped(), 2);
    }

    #[test]
    fn counter_wraps() {
        let mut decoder = LogDecoder::default();
        decoder.expected_sequence = u16::MAX;
        let decoded = decoder
            .decode(&record_payload(u16::MAX, "last", [0; 3]))
            .unwrap();
        assert!(decoded.gap.is_none());
        assert_eq!(decoder.expected_sequence(), 0);
    }

    #[test]
    fn invalid_records_are_rejected_without_advancing() {
        let mut decoder = LogDecoder::default();

        let err = decoder.decode(&Bytes::from_static(&[0u8; 10])).unwrap_err();
        assert!(matches!(err, Rejection::LengthMismatch { .. }));

        let mut bad_size = record_payload(0, "x", [0; 3]).to_vec();
        bad_size[8..12].copy_from_slice(&CommandHeader::new(0, 100).to_bytes()[8..12]);
        let err = decoder.decode(&Bytes::from(bad_size)).unwrap_err();
        assert!(matches!(
            err,
            Rejection::FieldMismatch {
                field: "num_bytes",
                ..
            }
        ));

        let mut bad_code = record_payload(0, "x", [0; 3]).to_vec();
        let mut header = CommandHeader::new(0, LOG_RECORD_SIZE);
        header.error_code = 2;
        bad_code[..16].copy_from_slice(&header.to_bytes());
        let err = decoder.decode(&Bytes::from(bad_code)).unwrap_err();
        assert_eq!(err, Rejection::ErrorCode(2));

        assert_eq!(decoder.expected_sequence(), 0);
    }

    #[test]
    fn unknown_severity_is_written_at_error_level() {
        let mut raw = record_payload(0, "x", [0; 3]).to_vec();
        raw[223] = 9;
        let decoded = LogDecoder::default().decode(&Bytes::from(raw)).unwrap();
        assert_eq!(decoded.level, Severity::Error);
        assert_eq!(decoded.record.severity(), Err(9));
    }

    #[test]
    fn file_sink_appends_level_prefixed_lines() {
        let path = std::env::temp_dir().join(format!(
            "debugport-log-sink-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let mut sink = FileLogSink::open(&path).unwrap();
            sink.write(Severity::Info, "1, 2, hello").unwrap();
            sink.discontinuity().unwrap();
            sink.write(Severity::Fatal, "boom").unwrap();
            sink.flush().unwrap();
        }
        {
            let mut sink = FileLogSink::open(&path).unwrap();
            sink.write(Severity::Debug, "again").unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "INFO, 1, 2, hello",
                DISCONTINUITY_MARKER,
                "CRITICAL, boom",
                "DEBUG, again"
            ]
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn tracing_sink_accepts_every_level() {
        let mut sink = TracingLogSink;
        for level in [
            Severity::Debug,
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Fatal,
        ] {
            sink.write(level, "line").unwrap();
        }
        sink.discontinuity().unwrap();
    }
}
