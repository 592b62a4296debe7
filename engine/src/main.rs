#[macro_use]
extern crate log;

use anyhow::{Context, Result};
use clap::Parser;
use kolo_common::{config::VERSION, time::SystemClock};
use kolo_engine::{
    config::ProcessorConfig,
    core::{janitor::Janitor, pipeline::TransactionPipeline, queue::MemoryQueue, storage::MemoryStore},
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kolo_engine", version, about = "Kolo ledger wallet engine")]
struct Args {
    /// Log filter, e.g. "info" or "kolo_engine=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    let config = ProcessorConfig::from_env().context("invalid processor configuration")?;
    info!("kolo engine {} starting", VERSION);

    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(clock.clone()));

    let pipeline = Arc::new(TransactionPipeline::new(
        store.clone(),
        queue.clone(),
        clock.clone(),
        config.clone(),
    ));
    let janitor = Arc::new(Janitor::new(store, queue, clock, config.clone()));

    let mut tasks = Vec::new();
    if config.run_processor {
        tasks.push(tokio::spawn(pipeline.clone().run()));
        tasks.push(tokio::spawn(janitor.clone().run()));
    } else {
        info!("transaction processor disabled (set RUN_TX_PROCESSOR=true to enable)");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!("shutdown signal received");

    pipeline.stop();
    janitor.stop();
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
