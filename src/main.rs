use orderbook_reconstructor::{config::Settings, orchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("starting order book reconstructor");

    let settings = Settings::from_env().map_err(|e| {
        tracing::error!("configuration error: {e}");
        e
    })?;

    tracing::info!(symbols = ?settings.symbols, http_addr = %settings.http_addr, "configuration loaded");

    orchestrator::run(settings).await?;

    Ok(())
}
