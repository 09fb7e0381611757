// src/main.rs

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dexquoter::api;
use dexquoter::config::Config;
use dexquoter::engine::QuoteEngine;
use dexquoter::rpc::ChainClients;

#[derive(Parser, Debug)]
#[command(name = "dexquoter", about = "DEX aggregation quote engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(Config::load(&cli.config).context("loading configuration")?);
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(config.log_level.as_deref().unwrap_or("info")),
    )
    .init();
    config.validate_and_log()?;

    let chains = Arc::new(ChainClients::from_config(&config)?);
    let engine = Arc::new(QuoteEngine::new(config.clone(), chains));

    // Periodic cache maintenance; lookups evict lazily, this bounds memory
    // for keys that never get hit again.
    {
        let engine = engine.clone();
        let period = Duration::from_secs(config.quote_cache_default_ttl_secs.max(5));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                engine.sweep();
            }
        });
    }

    let app = api::router(engine);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("listening on {}", config.listen_addr);
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}
