//! Node CLI

use anchor_ledger::{gateway::http::Client, signal::Signaler, units::Amount};
use anchor_node::{Config, Error, Node};
use clap::{Arg, ArgAction, Command};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A contract interaction requested on the command line.
struct Invocation {
    write: Option<String>,
    read: Option<String>,
    args: Vec<String>,
    value: Amount,
}

impl Invocation {
    /// Arguments for the `--read` method. `--args` belong to `--write` when both are given.
    fn read_args(&self) -> &[String] {
        if self.write.is_some() {
            &[]
        } else {
            &self.args
        }
    }
}

async fn run(config: Config, invocation: Invocation) -> Result<(), Error> {
    let (signaler, signal) = Signaler::new();
    let client = Client::new(config.ledger_url.clone(), config.request_timeout)?;

    let work = async {
        let node = Node::bootstrap(client, &config, signal).await?;
        let balance = node.balance().await?;
        info!(%balance, "node ready");

        if let Some(method) = &invocation.write {
            let args = node.contract().tokenize(method, &invocation.args)?;
            let receipt = node.submit(method, &args, invocation.value.into()).await?;
            println!("{}", serde_json::to_string_pretty(&receipt.raw).unwrap_or_default());
        }
        if let Some(method) = &invocation.read {
            let args = node.contract().tokenize(method, invocation.read_args())?;
            for token in node.read(method, &args).await? {
                println!("{token}");
            }
        }
        Ok(())
    };

    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            signaler.signal();
            Err(Error::Stopped)
        },
    }
}

/// Entrypoint for the Node CLI
#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("node")
        .version(crate_version())
        .about("Join an authority's deployment, get funded, and transact against its contract.")
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
        .arg(
            Arg::new("write")
                .long("write")
                .help("Contract method to submit once bootstrapped")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("read")
                .long("read")
                .help("Read-only contract method to call once bootstrapped (takes no arguments when combined with --write)")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("args")
                .long("args")
                .num_args(1..)
                .help("Arguments for --write, or for --read when no --write is given")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("value")
                .long("value")
                .default_value("0")
                .help("Value attached to --write (for example \"1 ether\")")
                .value_parser(clap::value_parser!(Amount)),
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
    let invocation = Invocation {
        write: matches.get_one::<String>("write").cloned(),
        read: matches.get_one::<String>("read").cloned(),
        args: matches
            .get_many::<String>("args")
            .map(|args| args.cloned().collect())
            .unwrap_or_default(),
        value: matches.get_one::<Amount>("value").copied().unwrap_or_default(),
    };

    if let Err(err) = run(config, invocation).await {
        error!(error = %err, "node failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(write: Option<&str>, read: Option<&str>) -> Invocation {
        Invocation {
            write: write.map(Into::into),
            read: read.map(Into::into),
            args: vec!["hello".into()],
            value: Amount::default(),
        }
    }

    #[test]
    fn test_args_go_to_read_alone() {
        let invocation = invocation(None, Some("getStr"));
        assert_eq!(invocation.read_args(), ["hello".to_string()]);
    }

    #[test]
    fn test_args_go_to_write_when_combined() {
        let invocation = invocation(Some("addStr"), Some("getStrList"));
        assert!(invocation.read_args().is_empty());
    }
}
