//! Alephium GPU Miner - Main Application
//!
//! Builds the worker pool over the configured devices, feeds it synthetic
//! templates and forwards found blocks to the configured sink.

use alephium_gpu_miner::{
    config::Config,
    device::EmulatedBackend,
    hasher::HasherState,
    job::TemplateBoard,
    job_feed::SyntheticJobFeed,
    miner::Miner,
    sink::{BlockSink, FileSink, LogSink},
    utils::{format_bytes, init_logging},
    worker::WorkerPool,
    Result, APP_NAME, APP_VERSION,
};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load().await?;

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let log_guard = init_logging(config.log_level, config.log_format, config.log_file.as_deref())?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        devices = config.devices,
        workers_per_device = config.workers_per_device,
        variant = %config.variant,
        header_len = config.header_len,
        "Configuration loaded"
    );

    let layout = config.layout();
    let backend = EmulatedBackend::new(config.emulated_device_config());

    // A worker that cannot start takes the whole process down
    let pool = match WorkerPool::new(&backend, config.workers_per_device, layout) {
        Ok(pool) => Arc::new(pool),
        Err(e) if e.is_fatal() => {
            error!(category = e.category(), "Failed to initialise worker pool: {}", e);
            drop(log_guard);
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };
    info!(
        "Allocated {} of hasher buffers",
        format_bytes(pool.len() * 2 * HasherState::alloc_size(layout))
    );

    let board = Arc::new(TemplateBoard::new());
    let sink = build_sink(&config).await?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });

    let feed = SyntheticJobFeed::new(
        layout,
        config.target()?,
        config.txs_len,
        config.job_interval()?,
    );
    let feed_handle = {
        let board = Arc::clone(&board);
        let cancel = cancel.clone();
        tokio::spawn(async move { feed.run(&board, cancel).await })
    };

    let miner = Miner::new(pool, board, sink).with_stats_interval(config.stats_interval()?);
    let result = miner.run(cancel.clone()).await;

    cancel.cancel();
    match feed_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Job feed stopped with error: {}", e),
        Err(e) => warn!("Job feed task failed: {}", e),
    }

    match result {
        Ok(()) => {}
        Err(e) if e.is_fatal() => {
            error!(category = e.category(), "Mining failed: {}", e);
            drop(log_guard);
            std::process::exit(1);
        }
        Err(e) => {
            error!(category = e.category(), "Mining stopped: {}", e);
            return Err(e);
        }
    }

    info!("{} stopped", APP_NAME);
    Ok(())
}

/// File sink when an output path is configured, log sink otherwise
async fn build_sink(config: &Config) -> Result<Arc<dyn BlockSink>> {
    let sink: Arc<dyn BlockSink> = match &config.block_output {
        Some(path) => Arc::new(FileSink::open(path).await?),
        None => Arc::new(LogSink::new(config.layout())),
    };
    Ok(sink)
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
