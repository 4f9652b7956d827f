use std::sync::Arc;

use tracing::info;

use spabook::config::Config;
use spabook::engine::Engine;
use spabook::notify::NotifyHub;
use spabook::payment::StaticVerifier;
use spabook::reaper;

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("no SIGTERM handler ({e}), waiting for ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    spabook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    // No gateway is wired in; payments are confirmed on the operator's word.
    let verifier = Arc::new(StaticVerifier::approving());
    let engine = Arc::new(Engine::new(
        config.journal_path(),
        config.engine.clone(),
        hub.clone(),
        verifier,
    )?);

    let calendar = engine.calendar();
    info!("spabook running");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  calendar: {} slots from {} every {} min",
        calendar.slots().count(),
        spabook::clock::format_minutes(calendar.open()),
        calendar.granularity()
    );
    info!("  technicians: {}", engine.list_technicians().len());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reaper_task = tokio::spawn(reaper::run_reaper(engine.clone(), config.reaper_interval));
    let compactor_task = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.reaper_interval,
    ));

    shutdown_signal().await;
    info!("shutdown signal received");
    reaper_task.abort();
    compactor_task.abort();

    if let Err(e) = engine.compact_journal().await {
        tracing::warn!("final compaction skipped: {e}");
    }
    info!("spabook stopped");
    Ok(())
}
