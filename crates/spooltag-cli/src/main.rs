mod cli;
mod shell;

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use spooltag_hardware::AnyDriver;
use spooltag_hardware::mock::{MockDriver, MockHandle};
use spooltag_session::{RequestCoordinator, SessionConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::shell::{Command, Output};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli)?;
    let (driver, mock) = build_driver(&cli, &config)?;
    info!(backend = driver.backend_name(), "starting spooltag shell");

    run(driver, mock, &config, cli.auto).await
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(filter) = &cli.reader {
        config.pcsc.reader_filter = Some(filter.clone());
    }
    Ok(config)
}

fn build_driver(cli: &Cli, config: &SessionConfig) -> Result<(AnyDriver, Option<MockHandle>)> {
    if cli.mock {
        let (driver, handle) = MockDriver::new();
        return Ok((AnyDriver::Mock(driver), Some(handle)));
    }
    pcsc_driver(config).map(|driver| (driver, None))
}

#[cfg(feature = "hardware-pcsc")]
fn pcsc_driver(config: &SessionConfig) -> Result<AnyDriver> {
    use spooltag_hardware::pcsc::PcscDriver;

    let mut driver = PcscDriver::new().with_poll_interval(config.pcsc.poll_interval());
    if let Some(filter) = &config.pcsc.reader_filter {
        driver = driver.with_reader_filter(filter.clone());
    }
    Ok(AnyDriver::Pcsc(driver))
}

#[cfg(not(feature = "hardware-pcsc"))]
fn pcsc_driver(_config: &SessionConfig) -> Result<AnyDriver> {
    anyhow::bail!(
        "built without PC/SC support; rebuild with --features hardware-pcsc or pass --mock"
    )
}

fn emit(output: &Output) -> Result<()> {
    let line = output.to_json_line().context("serializing output")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line).context("writing to stdout")?;
    stdout.flush().context("flushing stdout")
}

async fn run(
    driver: AnyDriver,
    mock: Option<MockHandle>,
    config: &SessionConfig,
    auto: bool,
) -> Result<()> {
    let (coordinator, mut notifications) = RequestCoordinator::new(driver, config);

    // Printed independently of commands so a slow command never stalls the loop.
    let printer = tokio::spawn(async move {
        while let Some(status) = notifications.recv().await {
            emit(&Output::AutoStatus(status))?;
        }
        anyhow::Ok(())
    });

    if auto {
        emit(&Output::AutoDetect(coordinator.set_auto_detect(true).await))?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => emit(&shell::execute(command, &coordinator, mock.as_ref()).await)?,
            Err(e) => {
                warn!(line = %line, error = %e, "rejected input");
                emit(&Output::error(e.to_string()))?
            }
        }
    }

    coordinator.shutdown().await;
    drop(coordinator);
    printer.await.context("notification printer")??;
    info!("shell closed");
    Ok(())
}
