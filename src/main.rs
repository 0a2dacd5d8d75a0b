pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod greedy;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod summary;
pub mod tokenizer_helper;
pub mod train;
pub mod utils;
pub mod validation;

use anyhow::Result;
use config::Config;
use tracing_subscriber::EnvFilter;
use train::train_model;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::default();
    let session = train_model(config)?;
    tracing::info!(epochs = session.epoch, global_step = session.global_step, "training finished");

    Ok(())
}
