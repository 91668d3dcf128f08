use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use debugport_router::RouterConfig;
use tracing::{info, warn};

use crate::cmd::{open_router, parse_duration, MonitorArgs};
use crate::exit::{CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_link_summary, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|duration| Instant::now() + duration);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut router = open_router(&args.link, RouterConfig::default())?;
    let device = args.link.device.display().to_string();
    info!(device = %device, "monitoring target logs");

    let mut code = SUCCESS;
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        if !router.is_running() {
            warn!(device = %device, "link closed");
            code = FAILURE;
            break;
        }
        thread::sleep(POLL);
    }

    router.shutdown();
    print_link_summary(&device, router.frame_stats(), router.stats(), format);
    Ok(code)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
