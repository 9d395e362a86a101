mod cli;
mod server;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use iskoces_gateway_engine::{
    GatewayMetrics, HttpTranslator, JobProcessor, JobRegistry, TranslationHandler, Translator,
    WorkerPool,
};

use crate::cli::Cli;
use crate::server::AppState;
use crate::shutdown::{ShutdownController, spawn_ctrl_c_handler};

const GC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let registry = prometheus::Registry::new();
    let metrics = GatewayMetrics::new(&registry);

    let mut pool = None;
    let translator: Arc<dyn Translator> = match &cli.http_fallback_url {
        Some(url) => {
            info!(%url, "translating through the HTTP fallback endpoint");
            Arc::new(HttpTranslator::new(
                url.clone(),
                cli.http_fallback_api_key.clone(),
            )?)
        }
        None => {
            let worker_pool =
                Arc::new(WorkerPool::new(cli.pool_config(), metrics.clone())?);
            pool = Some(worker_pool.clone());
            info!(
                engine = %cli.engine_kind(),
                workers = cli.max_workers,
                rendezvous_dir = %cli.rendezvous_dir.display(),
                "worker pool started"
            );
            worker_pool
        }
    };

    let processor = JobProcessor::new(translator, cli.chunk_size_bytes as usize);
    let jobs = JobRegistry::new(processor);
    let handler = TranslationHandler::new(jobs.clone());

    let token = CancellationToken::new();
    spawn_ctrl_c_handler(Arc::new(ShutdownController::new()), token.clone());

    let gc_jobs = jobs.clone();
    let gc_token = token.clone();
    let job_max_age = Duration::from_secs(cli.job_max_age_secs);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(GC_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                () = gc_token.cancelled() => return,
            }
            let removed = gc_jobs.gc(job_max_age);
            if removed > 0 {
                debug!(removed, "collected finished jobs");
            }
        }
    });

    let state = Arc::new(AppState {
        handler,
        pool: pool.clone(),
        registry,
    });
    server::serve(cli.listen, state, token.clone()).await?;

    if let Some(pool) = pool {
        pool.shutdown().await;
    }
    info!("gateway stopped");
    Ok(())
}
