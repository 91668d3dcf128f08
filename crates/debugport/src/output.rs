use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use debugport_frame::FrameStatsSnapshot;
use debugport_router::{opcode_name, CommandOutcome, CommandStatus, RouterStatsSnapshot};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct OutcomeOutput<'a> {
    command: &'a str,
    sequence: u16,
    status: &'a str,
    success: bool,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    timestamp: String,
}

pub fn print_outcomes(device: &str, outcomes: &[CommandOutcome], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for outcome in outcomes {
                let out = OutcomeOutput {
                    command: opcode_name(outcome.opcode),
                    sequence: outcome.sequence,
                    status: outcome.status.name(),
                    success: outcome.is_success(),
                    elapsed_ms: outcome.elapsed.as_millis() as u64,
                    reason: reason(&outcome.status),
                    timestamp: now_unix_seconds(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "COMMAND", "STATUS", "ELAPSED", "REASON"]);
            for outcome in outcomes {
                table.add_row(vec![
                    outcome.sequence.to_string(),
                    opcode_name(outcome.opcode).to_string(),
                    outcome.status.name().to_string(),
                    format!("{}ms", outcome.elapsed.as_millis()),
                    reason(&outcome.status).unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for outcome in outcomes {
                print!(
                    "{device}: {} seq={} {} in {}ms",
                    opcode_name(outcome.opcode),
                    outcome.sequence,
                    outcome.status.name(),
                    outcome.elapsed.as_millis()
                );
                match reason(&outcome.status) {
                    Some(reason) => println!(" ({reason})"),
                    None => println!(),
                }
            }
        }
    }
}

#[derive(Serialize)]
struct LinkSummary<'a> {
    device: &'a str,
    packets: u64,
    header_checksum_failures: u64,
    payload_checksum_failures: u64,
    oversized_headers: u64,
    discarded_bytes: u64,
    log_records: u64,
    log_gaps: u64,
    log_rejections: u64,
    late_responses: u64,
    protocol_errors: u64,
}

pub fn print_link_summary(
    device: &str,
    frame: FrameStatsSnapshot,
    router: RouterStatsSnapshot,
    format: OutputFormat,
) {
    let summary = LinkSummary {
        device,
        packets: frame.packets,
        header_checksum_failures: frame.header_checksum_failures,
        payload_checksum_failures: frame.payload_checksum_failures,
        oversized_headers: frame.oversized_headers,
        discarded_bytes: frame.discarded_bytes,
        log_records: router.log_records,
        log_gaps: router.log_gaps,
        log_rejections: router.log_rejections,
        late_responses: router.late_responses,
        protocol_errors: router.protocol_errors,
    };

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in summary_rows(&summary) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let rows: Vec<String> = summary_rows(&summary)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{device}: {}", rows.join(" "));
        }
    }
}

fn summary_rows(summary: &LinkSummary<'_>) -> [(&'static str, u64); 10] {
    [
        ("packets", summary.packets),
        ("header_checksum_failures", summary.header_checksum_failures),
        ("payload_checksum_failures", summary.payload_checksum_failures),
        ("oversized_headers", summary.oversized_headers),
        ("discarded_bytes", summary.discarded_bytes),
        ("log_records", summary.log_records),
        ("log_gaps", summary.log_gaps),
        ("log_rejections", summary.log_rejections),
        ("late_responses", summary.late_responses),
        ("protocol_errors", summary.protocol_errors),
    ]
}

fn reason(status: &CommandStatus) -> Option<String> {
    match status {
        CommandStatus::Rejected(rejection) => Some(rejection.to_string()),
        _ => None,
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
