//! app-ssh - Entry point
//!
//! Parses CLI arguments, connects to the application instance, starts any
//! port forwards, then runs the remote shell or command (or just holds the
//! connection open with `-N`) and exits with the remote exit status.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use app_ssh::config::{terminal_type, Args, Config};
use app_ssh::ssh::{RusshDialer, SecureShell, TcpListenerFactory};
use app_ssh::target::StaticTarget;
use app_ssh::terminal::StdTerminal;

/// Environment variable holding the log filter
const LOG_ENV: &str = "APP_SSH_LOG";

fn main() -> ExitCode {
    // Logs go to stderr so they never mix with remote stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(args)) {
        Ok(()) => 0,
        Err(e) => {
            let code = e
                .downcast_ref::<app_ssh::Error>()
                .map_or(1, app_ssh::Error::exit_code);
            // A remote non-zero exit is not a local failure worth printing
            if !matches!(e.downcast_ref::<app_ssh::Error>(), Some(app_ssh::Error::ExitStatus(_))) {
                eprintln!("Error: {:#}", e);
            }
            code
        }
    };

    // The blocking stdin reader would otherwise keep the runtime from shutting down
    runtime.shutdown_background();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::from_args(args)?;

    info!(
        "app-ssh v{} connecting to {} instance {}",
        env!("CARGO_PKG_VERSION"),
        config.options.app_name,
        config.options.instance_index
    );

    let skip_remote_execution = config.options.skip_remote_execution;
    let mut shell = SecureShell::new(
        Arc::new(RusshDialer::new()),
        Arc::new(StaticTarget(config.target)),
        Arc::new(StdTerminal),
    )
    .with_listener_factory(Arc::new(TcpListenerFactory))
    .with_terminal_type(terminal_type(std::env::var("TERM").ok()))
    .with_keepalive_interval(config.keepalive_interval);

    let result = session(&mut shell, config.options, skip_remote_execution).await;

    if let Err(e) = shell.close().await {
        debug!("Close failed: {}", e);
    }

    result
}

async fn session(
    shell: &mut SecureShell,
    options: app_ssh::SessionOptions,
    skip_remote_execution: bool,
) -> anyhow::Result<()> {
    shell
        .connect(options)
        .await
        .context("Error opening SSH connection")?;

    shell
        .local_port_forward()
        .await
        .context("Error forwarding port")?;
    for addr in shell.forward_addresses() {
        info!("Forwarding from {}", addr);
    }

    if skip_remote_execution {
        shell.wait().await?;
    } else {
        shell.interactive_session().await?;
    }

    Ok(())
}
