use debugport_router::{PingCommand, RouterConfig};
use tracing::info;

use crate::cmd::{open_router, parse_duration, PingArgs};
use crate::exit::{router_error, status_code, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_outcomes, OutputFormat};

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let config = RouterConfig {
        response_timeout: parse_duration(&args.response_timeout)?,
        send_timeout: parse_duration(&args.send_timeout)?,
        ..RouterConfig::default()
    };

    let router = open_router(&args.link, config)?;
    let device = args.link.device.display().to_string();
    info!(device = %device, count = args.count, offset = args.offset, "pinging target");

    let mut outcomes = Vec::with_capacity(args.count as usize);
    for _ in 0..args.count {
        let ping = PingCommand::new()
            .with_offset(args.offset)
            .with_test_value(args.test_value);
        let outcome = router
            .execute(ping)
            .map_err(|err| router_error("ping failed", err))?;
        outcomes.push(outcome);
    }

    print_outcomes(&device, &outcomes, format);

    // The worst outcome decides the exit code: timeout over rejection.
    let code = outcomes
        .iter()
        .map(|outcome| status_code(&outcome.status))
        .max()
        .unwrap_or(SUCCESS);
    Ok(code)
}
