use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use debugport_frame::{PacketTransport, TransportConfig};
use debugport_router::{FileLogSink, LogDecoderConfig, LogSink, Router, RouterConfig, TracingLogSink};
use debugport_transport::{SerialConfig, SerialPort};

use crate::exit::{frame_error, io_error, router_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod monitor;
pub mod ping;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ping the target and check the echoed values.
    Ping(PingArgs),
    /// Print target log records until interrupted.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ping(args) => ping::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Serial device of the debug port (e.g. /dev/ttyACM0).
    #[arg(env = "DEBUGPORT_DEVICE")]
    pub device: PathBuf,
    /// Baud rate.
    #[arg(long, env = "DEBUGPORT_BAUD", default_value = "115200")]
    pub baud: u32,
    /// Append target log records to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
    /// Render log variables in decimal instead of hex.
    #[arg(long)]
    pub decimal: bool,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Value the target adds to every returned pattern (decimal or 0x hex).
    #[arg(long, default_value = "0", value_parser = parse_u64)]
    pub offset: u64,
    /// Value the target must echo unchanged (decimal or 0x hex).
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    pub test_value: u32,
    /// Number of pings to send, one at a time.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,
    /// How long to wait for each response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub response_timeout: String,
    /// How long a send may block (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub send_timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Stop after this long (e.g. 30s) instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open the serial link and start a router on it.
pub fn open_router(link: &LinkArgs, mut config: RouterConfig) -> CliResult<Router> {
    let port = SerialPort::new(
        &link.device,
        SerialConfig {
            baud_rate: link.baud,
            ..SerialConfig::default()
        },
    );
    let transport = PacketTransport::start(port, TransportConfig::default())
        .map_err(|err| frame_error("open failed", err))?;

    config.log = LogDecoderConfig {
        hex_variables: !link.decimal,
        ..LogDecoderConfig::default()
    };
    let sink: Box<dyn LogSink> = match &link.log_file {
        Some(path) => Box::new(FileLogSink::open(path).map_err(|err| {
            io_error(&format!("failed opening {}", path.display()), err)
        })?),
        None => Box::new(TracingLogSink),
    };
    Router::start(transport, config, sink).map_err(|err| router_error("router start failed", err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn parse_u64(input: &str) -> Result<u64, String> {
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid number '{input}': {err}"))
}

fn parse_u32(input: &str) -> Result<u32, String> {
    let value = parse_u64(input)?;
    u32::try_from(value).map_err(|_| format!("{input} does not fit in 32 bits"))
}
