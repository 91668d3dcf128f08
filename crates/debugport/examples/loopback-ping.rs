//! Ping a simulated target over an in-memory link.
//!
//! The target thread answers every ping and emits one log record before
//! each answer, so both the command path and the log path are exercised.
//!
//! ```sh
//! cargo run -p debugport --example loopback-ping
//! ```

use std::io;
use std::thread;

use bytes::Bytes;
use debugport::frame::{PacketReader, PacketTransport, PacketType, PacketWriter, TransportConfig};
use debugport::router::{
    CommandHeader, LogSink, PingCommand, Router, RouterConfig, Severity, LOG_RECORD, PING_REQUEST,
    PING_RESPONSE,
};
use debugport::transport::MemoryPort;

struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&mut self, level: Severity, line: &str) -> io::Result<()> {
        println!("[target {}] {line}", level.name());
        Ok(())
    }

    fn discontinuity(&mut self) -> io::Result<()> {
        println!("[target] ---- records lost ----");
        Ok(())
    }
}

fn log_record(sequence: u16, offset: u64) -> debugport::frame::Result<Bytes> {
    let header = CommandHeader::new(0, LOG_RECORD.size);
    Ok(LOG_RECORD
        .builder()
        .prefix(&header.to_bytes())
        .uint("variable1", offset)?
        .uint("variable2", u64::from(sequence))?
        .uint("timestamp", 1000 + u64::from(sequence))?
        .bytes("template", b"ping offset {:X} handled as request {:X}")?
        .bytes("filename", b"ping_handler.cpp")?
        .uint("line_number", 42)?
        .uint("log_sequence_number", u64::from(sequence))?
        .uint("module_id", 3)?
        .uint("severity", Severity::Info as u64)?
        .build())
}

fn ping_reply(request: &[u8]) -> debugport::frame::Result<(u64, Bytes)> {
    let fields = PING_REQUEST.decode(request)?;
    let offset = fields.get("offset_to_add_to_response").unwrap_or(0);
    let mut header = CommandHeader::decode(request)?;
    header.num_bytes = PING_RESPONSE.size as u32;

    let mut builder = PING_RESPONSE.builder().prefix(&header.to_bytes());
    for name in ["uint8_value", "uint16_value", "uint32_value", "uint64_value"] {
        let value = fields.get(name).unwrap_or(0).wrapping_add(offset);
        builder = builder.uint(name, value)?;
    }
    let reply = builder
        .uint("test_value", fields.get("test_value").unwrap_or(0))?
        .build();
    Ok((offset, reply))
}

fn run_target(port: MemoryPort) -> debugport::frame::Result<()> {
    let mut reader = PacketReader::new(port.clone());
    let mut writer = PacketWriter::new(port);
    let mut log_sequence = 0u16;
    loop {
        let packet = reader.read_packet()?;
        let (offset, reply) = ping_reply(&packet.payload)?;
        writer.send_packet(PacketType::LoggingData, &log_record(log_sequence, offset)?)?;
        log_sequence = log_sequence.wrapping_add(1);
        writer.send_packet(PacketType::CommandResponse, &reply)?;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, target) = MemoryPort::pair();
    thread::spawn(move || run_target(target));

    let transport = PacketTransport::start(host, TransportConfig::default())?;
    let mut router = Router::start(transport, RouterConfig::default(), StdoutSink)?;

    for offset in [0u64, 1, 0x100] {
        let ping = PingCommand::new()
            .with_offset(offset)
            .with_test_value(0xC0FFEE);
        let outcome = router.execute(ping)?;
        println!(
            "ping seq={} offset={offset:#x}: {} in {:?}",
            outcome.sequence,
            outcome.status.name(),
            outcome.elapsed
        );
    }

    router.shutdown();
    let frame = router.frame_stats();
    let stats = router.stats();
    println!(
        "packets={} log_records={} gaps={}",
        frame.packets, stats.log_records, stats.log_gaps
    );
    Ok(())
}
