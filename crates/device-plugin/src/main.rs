use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use device_plugin::app::Application;
use device_plugin::app::ShutdownReason;
use device_plugin::config::Cli;
use tokio::sync::mpsc;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

/// Forwards SIGTERM and SIGINT to the application's shutdown channel.
fn spawn_signal_handler(shutdown: mpsc::Sender<ShutdownReason>) -> Result<()> {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }
        let _ = shutdown.send(ShutdownReason::Signal).await;
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_global_hooks();

    let cli = Cli::parse();

    let _guard = match &cli.log_file {
        Some(log_file) => Some(utils::logging::init_with_file(log_file)?),
        None => {
            utils::logging::init();
            None
        }
    };

    tracing::info!("Starting sample device plugin {}", &**version::VERSION);

    let settings = cli
        .settings()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report:?}"))?;
    let app = Application::new(settings, cli.inventory());
    spawn_signal_handler(app.shutdown_sender())?;

    match app.run().await {
        Ok(reason) => {
            tracing::info!("Device plugin exiting: {reason}");
            Ok(ExitCode::from(reason.exit_code()))
        }
        Err(report) => {
            tracing::error!("Device plugin failed: {report:?}");
            Err(anyhow::anyhow!("{report}"))
        }
    }
}
