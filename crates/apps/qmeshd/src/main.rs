mod bootstrap;
mod config;
mod control;
mod uds;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "qmeshd", version, about = "reinforcement-learning mesh routing daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the daemon (foreground, with a pid file).
    Start,
    /// Signal a running daemon to stop.
    Stop,
    /// Stop a running daemon, then start a new one.
    Restart,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("qmeshd: {err}");
            return ExitCode::from(2);
        }
    };

    let level = match config.log_level() {
        Ok(level) => level,
        Err(err) => {
            eprintln!("qmeshd: {err}");
            return ExitCode::from(2);
        }
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    match args.command {
        Cmd::Start => start(&config),
        Cmd::Stop => stop(&config),
        Cmd::Restart => {
            if control::stop(&config.pid_file) {
                log::info!("stopped the running daemon");
                std::thread::sleep(Duration::from_millis(200));
            }
            start(&config)
        }
    }
}

fn start(config: &Config) -> ExitCode {
    if let Some(pid) = control::read_pid(&config.pid_file) {
        if control::is_running(pid) {
            log::warn!("qmeshd is already running (pid {pid}); doing nothing");
            return ExitCode::SUCCESS;
        }
    }

    if let Err(err) = control::write_pid_file(&config.pid_file) {
        eprintln!("qmeshd: cannot write pid file {}: {err}", config.pid_file.display());
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("qmeshd: cannot start runtime: {err}");
            control::remove_pid_file(&config.pid_file);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(bootstrap::run(config.clone()));
    control::remove_pid_file(&config.pid_file);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("qmeshd exited with error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn stop(config: &Config) -> ExitCode {
    if control::stop(&config.pid_file) {
        log::info!("sent SIGTERM to the running daemon");
    } else {
        log::warn!("no running daemon found; nothing to stop");
    }
    ExitCode::SUCCESS
}
