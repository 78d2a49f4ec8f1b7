//! racoon - IKE key-management daemon.

use std::process::ExitCode;

use clap::Parser;
use racoon::cli::Command;
use racoon::config::FileConfig;
use racoon::daemon::{DaemonSubsystems, PassiveHandlers, log_ready};
use racoon::{Cli, CliError, CliResult};
use racoon_core::{TracingConfig, TracingOutputFormat, init_tracing};
use racoon_daemon::{
    BootstrapChannel, Reactor, SignalBridge, privileged_ops_from_config, run_listener, run_startup,
};
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("racoon: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    // A supervisor may hand over the real command line.
    let (cli, mut bootstrap) = match cli.bootstrap_socket.clone() {
        Some(path) => {
            let mut channel = BootstrapChannel::accept(&path)?;
            let args = channel.receive_arguments()?;
            let cli = Cli::try_parse_from(std::iter::once("racoon".to_string()).chain(args))
                .map_err(|e| CliError::Config(e.to_string()))?;
            (cli, Some(channel))
        }
        None => (cli, None),
    };

    let config = match &cli.config {
        Some(path) => FileConfig::load_from(path),
        None => FileConfig::load(),
    }
    .map_err(CliError::Config)?;

    let format = if cli.json_logs {
        TracingOutputFormat::Json
    } else {
        config.logging.format
    };
    init_tracing(
        TracingConfig::foreground()
            .with_level(cli.log_level(config.logging.level))
            .with_format(format),
    )?;

    if let Some(Command::PrivsepHelper { socket }) = &cli.command {
        let path = socket.clone().unwrap_or_else(|| config.privsep.socket.clone());
        run_listener(&path, config.privsep.confinement())?;
        return Ok(());
    }

    let signals = SignalBridge::new();
    signals.install()?;

    let daemon_config = config.daemon_config(&cli.listen);
    let privileged = privileged_ops_from_config(&daemon_config.privsep)?;
    let mut subsystems = DaemonSubsystems::new(daemon_config, privileged);
    if let Err(e) = run_startup(&mut subsystems) {
        subsystems.abort();
        return Err(e.into());
    }

    if let Some(channel) = bootstrap.as_mut() {
        channel.acknowledge()?;
    }

    let (context, scheduler, _privileged) = subsystems.into_parts()?;
    log_ready(&context);

    let mut reactor = Reactor::new(context, scheduler, PassiveHandlers::new(), signals.watch());
    let reason = reactor.run().await?;
    std::process::exit(reason.exit_code());
}
