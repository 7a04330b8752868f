use clap::Parser;
use log::error;
use server::config::{FailureBound, LockoutPolicy, ServerConfig, SessionSettings};
use server::network::{Server, ServerError};
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments for the chat server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Consecutive wrong passwords allowed before a lockout (1-5)
    #[clap(allow_hyphen_values = true)]
    failures: i64,

    /// Address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// File with one `username password` pair per line
    #[clap(short, long, default_value = "credentials.txt")]
    credentials: PathBuf,

    /// Seconds an account stays locked after too many failures
    #[clap(short, long, default_value = "10")]
    lockout_secs: u64,

    /// What to do with a connection once its account gets locked
    #[clap(long, value_enum, default_value = "reprompt")]
    lockout_policy: LockoutPolicy,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    println!("Starting chat server on {}", config.bind_address());
    println!("Use RUST_LOG=info for detailed logging");

    let server = Server::from_config(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

/// Validates the arguments into the server configuration
fn build_config(args: Args) -> Result<ServerConfig, ServerError> {
    let failure_bound = FailureBound::new(args.failures)?;

    Ok(ServerConfig {
        host: args.host,
        port: args.port,
        credentials: args.credentials,
        lockout_window: Duration::from_secs(args.lockout_secs),
        session: SessionSettings {
            failure_bound,
            lockout_policy: args.lockout_policy,
        },
    })
}
