use tracing::info;

use crate::cli::ServerArgs;
use downloaderd::config::Config;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(args: ServerArgs) -> Result<(), AnyError> {
    info!("Loading configuration");
    let mut config =
        Config::load(args.config).map_err(|e| format!("Failed to load config: {}", e))?;

    if let Some(address) = args.address {
        config.server.bind_addr = address;
    }
    if let Some(workers) = args.workers {
        config.engine.workers = workers;
    }
    if let Some(queue_length) = args.queue_length {
        config.engine.queue_length = queue_length;
    }

    info!(
        workers = config.engine.workers,
        queue_length = config.engine.queue_length,
        "Starting downloaderd"
    );
    downloaderd::api::run(config).await
}
