//! Main application entry point for the Switchboard server.
//!
//! Parses the command line, loads configuration, then either hands control
//! to the daemon controller (`start`, `stop`, `restart`) or serves in this
//! process (`run`, and the background child spawned by `start`).

mod cli;
mod config;
mod daemon;
mod listeners;
mod logging;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::AppConfig;
use daemon::{ControlOutcome, DaemonController, DaemonError, Operation, PidFile, ProcessSpawner};
use logging::LogTarget;
use std::time::Duration;
use switchboard_server::{Dispatcher, ServerError, SocketServer};
use tracing::{debug, error, info};

const BIND_FAILURE_HINT: &str = "Cannot start server. Maybe is another instance already running \
     on same port? Use -d to get more information";

/// Main application struct.
pub struct Application {
    args: CliArgs,
    config: AppConfig,
}

impl Application {
    /// Loads configuration, applies CLI overrides and sets up logging.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);

        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {}", e);
        }

        let target = if args.daemonized {
            LogTarget::Background
        } else {
            LogTarget::Foreground
        };
        logging::setup_logging(&config.logging, target)?;

        debug!("Configuration loaded from {}", args.config_path.display());
        Ok(Self { args, config })
    }

    fn controller(&self) -> anyhow::Result<DaemonController<ProcessSpawner>> {
        let pid_file = PidFile::new(&self.config.daemon.pid_file);
        // The child runs detached, so it must not depend on our working directory.
        let config_path = std::fs::canonicalize(&self.args.config_path)
            .with_context(|| format!("Cannot resolve {}", self.args.config_path.display()))?;
        let spawner = ProcessSpawner::for_current_exe(&self.args, &config_path, pid_file.path())?;
        Ok(DaemonController::new(pid_file, self.args.force, spawner)
            .with_stop_timeout(Duration::from_secs(self.config.daemon.stop_timeout_secs)))
    }

    /// Runs the requested operation against the PID file.
    pub fn control(&self, operation: Operation) -> anyhow::Result<ControlOutcome> {
        let controller = self.controller()?;
        Ok(controller.execute(operation)?)
    }

    /// Serves until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let server_config = self.config.to_server_config()?;
        let providers = listeners::providers_for(&self.config.listeners.enabled);
        let dispatcher = Dispatcher::from_providers(providers, &listeners::builtin_catalog())?;
        info!("Listeners: {}", dispatcher.listener_names().join(", "));

        let mut server = SocketServer::new(server_config, dispatcher);
        if let Some(name) = &self.config.listeners.identification {
            server = server.with_identification(listeners::resolve_identification(name)?);
            info!("Identification adapter: {}", name);
        }

        let listener = match server.bind() {
            Ok(listener) => listener,
            Err(e) => {
                if self.args.debug {
                    error!("{}", e);
                }
                return Err(e).context(BIND_FAILURE_HINT);
            }
        };

        let shutdown = server.shutdown_sender();
        let mut server_handle = tokio::spawn(server.serve(listener));
        info!("Server is running, press Ctrl+C to stop");

        let finished = tokio::select! {
            signal = signals::wait_for_shutdown_signal() => {
                signal.context("Cannot install signal handlers")?;
                None
            }
            finished = &mut server_handle => Some(finished),
        };
        let finished = match finished {
            Some(finished) => finished,
            None => {
                info!("Shutdown signal received, stopping server");
                let _ = shutdown.send(());
                server_handle.await
            }
        };
        match finished {
            Ok(result) => result?,
            Err(e) => anyhow::bail!("Server task failed: {}", e),
        }

        info!("Server stopped");
        Ok(())
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error.downcast_ref::<DaemonError>().map(DaemonError::exit_code).unwrap_or(1)
}

/// Operator-facing text for a failed operation.
///
/// A bind failure is reduced to [`BIND_FAILURE_HINT`] unless `debug` is set,
/// in which case the full error chain is shown.
fn failure_message(error: &anyhow::Error, debug: bool) -> String {
    let bind_failure = matches!(
        error.root_cause().downcast_ref::<ServerError>(),
        Some(ServerError::TransportBind(_))
    );
    if bind_failure && !debug {
        BIND_FAILURE_HINT.to_string()
    } else {
        format!("{:#}", error)
    }
}

fn report(error: &anyhow::Error, debug: bool) {
    eprintln!("{}", failure_message(error, debug));
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();
    let debug = args.debug;
    let daemonized = args.daemonized;

    let operation = match args.operation.parse::<Operation>() {
        Ok(operation) => operation,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to start application: {:#}", e);
            std::process::exit(1);
        }
    };

    let outcome = match app.control(operation) {
        Ok(outcome) => outcome,
        Err(e) => {
            report(&e, debug);
            std::process::exit(exit_code(&e));
        }
    };

    if outcome == ControlOutcome::Serve {
        if let Err(e) = app.run().await {
            if daemonized {
                error!("Application error: {:#}", e);
            } else {
                report(&e, debug);
            }
            std::process::exit(1);
        }
    }
}
