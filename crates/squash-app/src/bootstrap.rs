//! Process bootstrap: flags, logging, collaborators, run.

use std::sync::Arc;

use clap::Parser;
use squash_config::RunConfig;
use squash_store::{FsObjectStore, ObjectStore};
use squash_telemetry::{
    GlobalContextGuard, LogFormat, LoggingConfig, Metrics, build_sha, init_logging,
};
use squash_transport::{MessageTransport, SpoolTransport};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::app::Application;
use crate::cli::Cli;
use crate::error::{AppError, AppResult};
use crate::http::{router, serve_metrics};
use crate::shutdown::spawn_signal_listener;

/// Entry point for the `squash` binary.
///
/// # Errors
///
/// Returns an error if settings are invalid, telemetry cannot start, a
/// direct-mode transfer fails, or event-driven mode hits a fatal transport error.
pub async fn run_app() -> AppResult<()> {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        level: &cli.log_level,
        format: LogFormat::parse(cli.log_format.as_deref()),
        build_sha: build_sha(),
    };
    init_logging(&logging).map_err(|err| AppError::telemetry("telemetry.init", err))?;

    let config = RunConfig::from_raw(cli.raw_settings()).map_err(|err| {
        error!(field = err.field(), reason = %err.describe(), "invalid settings");
        AppError::config("settings.validate", err)
    })?;
    let _context = GlobalContextGuard::new(config.mode.label());
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(cli.store_root.clone()));
    let transport: Arc<dyn MessageTransport> =
        Arc::new(SpoolTransport::new(&cli.spool_root, &config.project_id));
    info!(
        store_root = %cli.store_root.display(),
        spool_root = %cli.spool_root.display(),
        project = %config.project_id,
        "squash starting"
    );

    let app = Application::new(config, store, transport, metrics);
    let (signal_tx, signal_rx) = mpsc::channel(4);
    let listener = spawn_signal_listener(signal_tx);
    let http = cli.metrics_addr.map(|addr| {
        tokio::spawn(serve_metrics(
            addr,
            router(app.metrics().clone(), app.shutdown_state()),
            app.root(),
        ))
    });

    let result = app.run(signal_rx).await;
    app.root().cancel();
    listener.abort();
    if let Some(http) = http {
        match http.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, detail = ?err, "metrics listener stopped with an error"),
            Err(err) => warn!(error = %err, "metrics listener task failed"),
        }
    }

    match result {
        Ok(summary) => {
            info!(summary = ?summary, "squash finished");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, detail = ?err, "squash failed");
            Err(err)
        }
    }
}
