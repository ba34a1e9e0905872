//! Top-level command body

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::adapters::session::SessionSpec;
use crate::cli::Cli;
use crate::engine::Scheduler;
use crate::error::{exit_code, resolve_exit_code};
use crate::term;
use crate::utils::bench;
use crate::utils::logging::LogHandle;

/// Run the whole tool: load the session, drive the transcode, map the
/// outcome onto a process exit code.
pub fn run(cli: Cli, log: LogHandle) -> i32 {
    let opts = cli.options();

    let Some(session_path) = &cli.session else {
        print_usage();
        return exit_code::SETUP;
    };

    let spec = match load_session(session_path) {
        Ok(spec) => spec,
        Err(e) => {
            error!("{:#}", e);
            return exit_code::SETUP;
        }
    };

    if spec.is_empty() {
        print_usage();
        return exit_code::SETUP;
    }
    if spec.outputs.is_empty() {
        error!("At least one output file must be specified");
        return exit_code::SETUP;
    }

    let (graph, backend) = match spec.build().context("invalid session description") {
        Ok(built) => built,
        Err(e) => {
            error!("{:#}", e);
            return exit_code::SETUP;
        }
    };

    term::init(opts.stdin_interaction);

    let start_stamps = bench::time_stamps();
    let do_benchmark = opts.do_benchmark;

    let scheduler = Scheduler::new(
        graph,
        Box::new(backend.demuxer()),
        Box::new(backend.decoder()),
        Box::new(backend.filters()),
        Box::new(backend.output()),
        opts,
        Some(log),
    )
    .context("failed to set up the transcode pipeline");
    let mut scheduler = match scheduler {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("{:#}", e);
            term::exit();
            return exit_code::SETUP;
        }
    };

    let outcome = scheduler.run();

    if outcome.result.is_ok() && do_benchmark {
        let end_stamps = bench::time_stamps();
        info!(
            "bench: utime={:.3}s stime={:.3}s rtime={:.3}s",
            (end_stamps.user_usec - start_stamps.user_usec) as f64 / 1e6,
            (end_stamps.sys_usec - start_stamps.sys_usec) as f64 / 1e6,
            (end_stamps.real_usec - start_stamps.real_usec) as f64 / 1e6,
        );
    }

    let code = resolve_exit_code(
        term::received_signal().is_some(),
        outcome.err_rate_exceeded,
        &outcome.result,
    );

    if do_benchmark {
        info!("bench: maxrss={}kB", bench::max_rss() / 1024);
    }
    if let Some(sig) = term::received_signal() {
        info!("Exiting normally, received signal {}.", sig);
    } else if code != exit_code::SUCCESS {
        info!("Conversion failed!");
    }

    term::exit();
    term::mark_exited();

    code
}

/// Load and parse the session description, with the path woven into any
/// failure.
fn load_session(path: &Path) -> Result<SessionSpec> {
    SessionSpec::load(path)
        .with_context(|| format!("failed to load session {}", path.display()))
}

fn print_usage() {
    eprintln!("usage: transmux --session <file.json> [options]");
    warn!("Run 'transmux --help' for the full option list");
}
