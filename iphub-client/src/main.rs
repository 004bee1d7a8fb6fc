mod client;

use clap::{Parser, Subcommand};
use anyhow::{bail, Context, Result};
use crate::client::{local_address_towards, RegistryClient};

/// Report this machine's address to an IP Hub registry, or look others up
#[derive(Parser, Debug)]
#[command(name = "iphub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Registry base URL
    #[arg(long, env = "IPHUB_SERVER", default_value = "http://localhost:5000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register or refresh a hostname's address
    Report {
        /// Defaults to the system hostname
        #[arg(long)]
        hostname: Option<String>,
        /// Defaults to the local address used to reach the registry
        #[arg(long)]
        address: Option<String>,
    },
    /// Print the address registered for a hostname
    Get { hostname: String },
    /// Print every registered hostname
    List,
    /// Forget a hostname
    Remove { hostname: String },
    /// Print the registry digest, which changes whenever a mapping does
    Hash,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .init();

    let cli = Cli::parse();
    let client = RegistryClient::new(&cli.server)?;

    match cli.command {
        Command::Report { hostname, address } => {
            let hostname = match hostname {
                Some(h) => h,
                None => hostname::get()
                    .context("Failed to get system hostname")?
                    .to_string_lossy()
                    .to_string(),
            };
            let address = match address {
                Some(a) => a,
                None => local_address_towards(client.base())?.to_string(),
            };

            tracing::debug!("Reporting {} -> {} to {}", hostname, address, client.base());

            let record = client.report(&hostname, &address).await?;
            println!("{} -> {} ({})", record.hostname, record.address, record.last_updated);
        }
        Command::Get { hostname } => match client.resolve(&hostname).await? {
            Some(record) => println!("{}", record.address),
            None => bail!("Hostname '{}' not found", hostname),
        },
        Command::List => {
            for hostname in client.list().await? {
                println!("{}", hostname);
            }
        }
        Command::Remove { hostname } => {
            if !client.remove(&hostname).await? {
                bail!("Hostname '{}' not found", hostname);
            }
            println!("Removed {}", hostname);
        }
        Command::Hash => println!("{}", client.digest().await?),
    }

    Ok(())
}
