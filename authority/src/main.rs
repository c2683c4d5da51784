//! Authority CLI

use anchor_authority::{server, Authority, Config, Error};
use anchor_ledger::{gateway::http::Client, signal::Signaler};
use clap::{Arg, ArgAction, Command};
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

async fn run(config: Config) -> Result<(), Error> {
    let (signaler, signal) = Signaler::new();
    let client = Client::new(config.ledger_url.clone(), config.request_timeout)?;
    let listener = TcpListener::bind(config.listen).await?;
    let compiler = config.compiler.clone();
    let authority = Arc::new(Authority::from_env(client, config, signal.clone())?);

    // Serve status immediately so nodes can poll while bootstrap runs
    let server = tokio::spawn(server::serve_until(
        authority.clone(),
        listener,
        signal.clone(),
    ));

    tokio::select! {
        result = authority.bootstrap(&compiler) => {
            if let Err(err) = result {
                signaler.signal();
                let _ = server.await;
                return Err(err);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted during bootstrap");
            signaler.signal();
            let _ = server.await;
            return Ok(());
        },
    }

    // Serve until interrupted
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
    signaler.signal();
    match server.await {
        Ok(result) => result,
        Err(err) => Err(Error::Io(std::io::Error::other(err))),
    }
}

/// Entrypoint for the Authority CLI
#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("authority")
        .version(crate_version())
        .about("Deploy a ledger-resident program and fund nodes that ask for it.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to YAML config file (defaults are used when omitted)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Load configuration
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!(error = %err, ?path, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "authority failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
