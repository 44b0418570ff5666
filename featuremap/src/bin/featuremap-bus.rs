use std::net::SocketAddr;

use featuremap::{
    bus::{BusServer, LocalBus},
    constants::DEFAULT_BUS_ADDR,
    persistence::{sqlite::SqliteLog, RetentionLog},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let address = std::env::var("FEATUREMAP_BUS_ADDR")
        .unwrap_or_else(|_| DEFAULT_BUS_ADDR.to_string());
    let address: SocketAddr = match address.parse() {
        Ok(address) => address,
        Err(e) => {
            error!("Invalid FEATUREMAP_BUS_ADDR {:?}: {}", address, e);
            return;
        }
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutting down");
        signal.cancel();
    });

    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let log = match SqliteLog::connect(&database_url).await {
                Ok(log) => log,
                Err(e) => {
                    error!("Failed to open {}: {}", database_url, e);
                    return;
                }
            };
            info!("Retaining messages in {}", database_url);
            serve(LocalBus::with_log(log), address, shutdown).await;
        }
        Err(_) => {
            info!("Retaining messages in memory");
            serve(LocalBus::new(), address, shutdown).await;
        }
    }
}

async fn serve<L: RetentionLog>(
    bus: LocalBus<L>,
    address: SocketAddr,
    shutdown: CancellationToken,
) {
    if let Err(e) = BusServer::new(bus).serve(address, shutdown).await {
        error!("Bus server exited: {}", e);
    }
}
