use clap::Parser;
use log::{error, info};
use server::config::ServerArgs;
use server::network::{Server, ServerError, ServerMessage};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerArgs::parse().into_config()?;
    for (id, duration) in config.missions.iter() {
        info!("Mission {}: {}s", id, duration.as_secs());
    }

    let mut server = Server::bind(&config).await?;
    let shutdown = server.message_sender();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = shutdown.send(ServerMessage::Shutdown) {
                error!("Failed to signal shutdown: {}", e);
            }
        }
    });

    server.run().await?;

    Ok(())
}
