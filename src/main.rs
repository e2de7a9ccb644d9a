use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use campaign_dispatch::config::DispatcherConfig;
use campaign_dispatch::database::MongoDatabase;
use campaign_dispatch::dispatch::Scheduler;
use campaign_dispatch::mailer::SparkPostClient;
use campaign_dispatch::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = DispatcherConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NEW)
        .compact()
        .init();

    info!(?config, "loaded configuration");

    let db = MongoDatabase::connect(&config.mongodb_uri, &config.database_name).await?;
    info!(database = db.name(), "connected to db");

    let mailer = SparkPostClient::new(
        &config.sparkpost_api_key,
        &config.sparkpost_base_url,
        config.http_timeout(),
    )?;

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                token.cancel();
            }
            Err(err) => error!(%err, "failed to listen for shutdown signal"),
        }
    });

    let scheduler = Scheduler::new(
        Arc::new(db),
        Arc::new(mailer),
        config.tick_interval(),
        config.dispatch_options(),
    );

    scheduler.run(shutdown).await
}
