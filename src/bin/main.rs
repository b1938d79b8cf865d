use std::{
    env,
    ffi::OsString,
    io::{self, Write},
    process::ExitCode,
    thread,
    time::Duration,
};

use tracing::error;
use tracing_subscriber::EnvFilter;

use forkpool::{
    cli::{self, Cli},
    config::program_name,
    supervisor::Supervisor,
};

/// How often each demo worker announces itself.
const HEARTBEAT: Duration = Duration::from_secs(3);

fn main() -> ExitCode {
    let argv: Vec<OsString> = env::args_os().collect();
    let parsed = cli::parse_args(&argv);
    init_logging(parsed.as_ref().ok());

    let mut supervisor = Supervisor::new();
    supervisor.set_handler(handler);
    if let Some(name) = argv.first().and_then(program_name) {
        supervisor.set_name(name);
    }

    let result = match parsed {
        Ok(args) => supervisor.dispatch(args),
        Err(err) => Ok(supervisor.reject(&err)),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn handler(index: usize) {
    loop {
        // The launcher's terminal may be gone; a failed write must not kill the worker.
        let _ = writeln!(io::stdout().lock(), "this is #{index}");
        thread::sleep(HEARTBEAT);
    }
}

fn init_logging(args: Option<&Cli>) {
    let filter = if let Some(level) = args.and_then(|args| args.log_level) {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
