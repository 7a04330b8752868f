use clap::Parser;
use client::network::Client;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    host: String,

    /// Server port
    port: u16,

    /// Local port reserved for private peer sessions
    peer_port: u16,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");

    let client = Client::new(&args.host, args.port, args.peer_port);
    if let Err(e) = client.run().await {
        error!("Client stopped: {}", e);
        eprintln!("Connection lost: {}", e);
        std::process::exit(1);
    }
}
