//! Uplo CLI - Command-line interface for the Uplo SDK
//!
//! This CLI can launch uplod, check whether its API is reachable, make raw
//! API calls and convert between uplocoins and hastings.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use uplo_sdk::client::{self, UplodClient};
use uplo_sdk::launch::{LaunchSettings, DIRECTORY_SETTING};
use uplo_sdk::pool::ConnectionPool;
use uplo_sdk::request::RequestOptions;
use uplo_sdk::units::{format_hastings, format_uplocoins, hastings_to_uplocoins, uplocoins_to_hastings};
use uplo_sdk::{Error, Result};

/// How often `launch --wait` polls the API
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timeout of each readiness poll made by `launch --wait`
const READY_POLL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "uplo-cli")]
#[command(about = "Uplo SDK Command Line Interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Address of the uplod API
    #[arg(short, long, global = true, default_value = "localhost:8480")]
    addr: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the uplod API is reachable
    Status,
    /// Make a call to the uplod API and print the response
    Call {
        /// API path, e.g. /gateway
        path: String,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Query parameter (key=value), may be repeated
        #[arg(short, long = "query")]
        query: Vec<String>,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
        /// Request timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// API password (for uplod started with --authenticate-api)
        #[arg(long)]
        password: Option<String>,
    },
    /// Launch uplod
    Launch {
        /// Path to the uplod executable
        uplod: PathBuf,
        /// Extra flag (key=value), may be repeated
        #[arg(short, long = "set")]
        set: Vec<String>,
        /// Flag to leave off the command line, may be repeated
        #[arg(long = "disable")]
        disable: Vec<String>,
        /// Uplo data directory; the output log is written there too
        #[arg(long)]
        uplo_directory: Option<PathBuf>,
        /// Wait for the API to come up, then wait for uplod to exit
        #[arg(short, long)]
        wait: bool,
    },
    /// Convert between uplocoins and hastings
    Convert {
        #[command(subcommand)]
        direction: ConvertDirection,
    },
}

#[derive(Subcommand)]
enum ConvertDirection {
    /// Convert an amount of uplocoins to hastings
    ToHastings { amount: String },
    /// Convert an amount of hastings to uplocoins
    ToUplocoins { amount: String },
}

fn parse_pair(pair: &str) -> Result<(String, String)> {
    pair.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| Error::InvalidParameter(format!("expected key=value, got {:?}", pair)))
}

fn build_settings(
    set: &[String],
    disable: &[String],
    uplo_directory: Option<&PathBuf>,
) -> Result<LaunchSettings> {
    let mut settings = LaunchSettings::new();
    for pair in set {
        let (key, value) = parse_pair(pair)?;
        settings.insert(key, value);
    }
    for key in disable {
        settings.insert(key.clone(), false);
    }
    if let Some(dir) = uplo_directory {
        settings.insert(DIRECTORY_SETTING, dir.clone());
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging if verbose
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .init();
    }

    let pool = ConnectionPool::with_defaults()?;

    match &cli.command {
        Commands::Status => {
            if client::is_running(&pool, &cli.addr).await {
                println!("✓ uplod API is reachable at {}", cli.addr);
            } else {
                eprintln!("uplod API is not reachable at {}", cli.addr);
                std::process::exit(1);
            }
        }
        Commands::Call {
            path,
            method,
            query,
            data,
            timeout_ms,
            password,
        } => {
            let method = method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| Error::InvalidParameter(format!("Invalid method: {}", e)))?;

            let mut options = RequestOptions::new(path.clone()).method(method);
            for pair in query {
                let (key, value) = parse_pair(pair)?;
                options = options.query(key, value);
            }
            if let Some(data) = data {
                options = options.json_body(serde_json::from_str(data)?);
            }
            if let Some(ms) = timeout_ms {
                options = options.timeout(Duration::from_millis(*ms));
            }
            if let Some(password) = password {
                options = options.api_password(password.clone());
            }

            let uplod = match UplodClient::connect(&pool, cli.addr.clone()).await {
                Ok(uplod) => uplod,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!("\nMake sure uplod is running and its API is listening on {}.", cli.addr);
                    std::process::exit(1);
                }
            };

            match uplod.call(options).await {
                Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                Err(Error::Api { status, body }) => {
                    eprintln!("API error (status {}):", status);
                    eprintln!("{}", serde_json::to_string_pretty(&body)?);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Error calling {}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Launch {
            uplod,
            set,
            disable,
            uplo_directory,
            wait,
        } => {
            let settings = build_settings(set, disable, uplo_directory.as_ref())?;
            let api_addr = settings
                .get("api-addr")
                .map(|value| value.to_string())
                .unwrap_or_else(|| "localhost:8480".to_string());

            let mut process = uplo_sdk::launch(uplod.clone(), settings)?;
            println!("✓ Started uplod (pid {})", process.id().unwrap_or_default());
            println!("Flags: {}", process.flags().join(" "));
            println!("Output: {}", process.log_path().display());

            if *wait {
                println!("\nWaiting for the API at {}...", api_addr);
                loop {
                    if client::is_running_within(&pool, &api_addr, READY_POLL_TIMEOUT).await {
                        println!("✓ uplod API is ready");
                        break;
                    }
                    if let Some(status) = process.try_wait()? {
                        eprintln!("uplod exited before its API came up: {}", status);
                        eprintln!("Check {} for details.", process.log_path().display());
                        std::process::exit(1);
                    }
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }

                let status = process.wait().await?;
                println!("uplod exited: {}", status);
            }
        }
        Commands::Convert { direction } => match direction {
            ConvertDirection::ToHastings { amount } => {
                let hastings = uplocoins_to_hastings(amount.as_str())?;
                println!("{}", format_hastings(&hastings));
            }
            ConvertDirection::ToUplocoins { amount } => {
                let uplocoins = hastings_to_uplocoins(amount.as_str())?;
                println!("{}", format_uplocoins(&uplocoins));
            }
        },
    }

    Ok(())
}
