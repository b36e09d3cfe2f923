use clap::Parser;
use client::network::Console;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:4000")]
    server: String,

    /// Re-request the global status every N seconds (0 disables)
    #[arg(short = 'w', long, default_value = "0")]
    watch: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting console...");
    if args.watch > 0 {
        info!("Polling status every {}s", args.watch);
    }
    println!("Type 'help' for a list of commands");

    let mut console = Console::new(&args.server, Some(Duration::from_secs(args.watch))).await?;

    console.run().await?;

    Ok(())
}
