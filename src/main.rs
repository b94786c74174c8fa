use clap::Parser;
use color_eyre::Result;
use gc10_link::{cli, config::Config, logging, mock::MockBuilder, server};
use std::time::Duration;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info, Level};

// Everything, serial and HTTP alike, runs cooperatively on one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(Level::INFO, cli.log_dir.map(|dir| (Level::DEBUG, dir))).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    let port = cli.port.unwrap_or(config.port);
    let mock = cli.mock;

    let serving = async move {
        if mock {
            info!("Using a mock instrument");
            let (io, _handle) = MockBuilder::new()
                .counts(Duration::from_secs(5), 21)
                .build();

            server::run_with_transport(config, io, port).await
        } else {
            server::run_on_port(config, port).await
        }
    };

    #[cfg(unix)]
    let mut hangup = signal(SignalKind::hangup())?;

    #[cfg(unix)]
    let hung_up = hangup.recv();

    #[cfg(not(unix))]
    let hung_up = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hung_up => {
            info!("Told to hang up, quitting")
        }
        result = serving => {
            error!(?result, "Server returned");

            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    Ok(())
}
