use clap::Parser;
use clap::error::ErrorKind;
use std::process::ExitCode;
use std::time::Duration;
use tufctl::cli::Cli;
use tufctl::command::ChildRegistry;
use tufctl::context::Context;
use tufctl::deadline::{Deadline, Watchdog};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    tufctl::logging::init(cli.debug);
    let config = tufctl::config::load(cli.config.as_ref());
    tracing::debug!("config: {:?}", config);

    let children = ChildRegistry::default();
    let on_signal = children.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::debug!("interrupted, terminating child processes");
        on_signal.terminate_all();
        std::process::exit(0);
    }) {
        tracing::warn!("could not install signal handler: {}", e);
    }

    let deadline = Deadline::after(Duration::from_secs(config.timeouts.command_secs));
    let on_expire = children.clone();
    let _watchdog = Watchdog::arm(deadline, move || {
        on_expire.terminate_all();
        eprintln!("Operation timed out");
        std::process::exit(1);
    });

    let json = cli.json;
    let ctx = Context::system(config, deadline, children);
    let mut stdout = std::io::stdout().lock();
    match tufctl::dispatch::run(&ctx, cli.command, &mut stdout, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
