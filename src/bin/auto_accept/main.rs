use auto_accept::lifecycle::USAGE_EXIT_CODE;
use auto_accept::{init_logging, log_debug, log_file_path, run_session, CliArgs, SupervisorConfig};
use clap::Parser;
use std::env;
use std::process;

fn main() {
    let code = run();
    process::exit(code);
}

/// Everything that owns terminal or signal state is dropped before this
/// returns, so `process::exit` never skips a restore.
fn run() -> i32 {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { USAGE_EXIT_CODE } else { 0 };
            let _ = err.print();
            return code;
        }
    };

    if let Err(err) = init_logging(args.debug, &args.log_path()) {
        eprintln!("auto-accept: logging disabled: {err:#}");
    }
    log_debug("=== auto-accept started ===");
    tracing::debug!(
        log_file = ?log_file_path(),
        argv = ?env::args().collect::<Vec<_>>(),
        "startup"
    );

    let config = match SupervisorConfig::resolve(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("auto-accept: {err:#}");
            return USAGE_EXIT_CODE;
        }
    };
    let Some((program, child_args)) = args.split_command() else {
        eprintln!("auto-accept: no command given");
        return USAGE_EXIT_CODE;
    };

    match run_session(&config, program, child_args) {
        Ok(code) => {
            tracing::debug!(code, "=== auto-accept exiting ===");
            code
        }
        Err(err) => {
            tracing::debug!(error = ?err, "session failed");
            eprintln!("auto-accept: {err:#}");
            USAGE_EXIT_CODE
        }
    }
}
