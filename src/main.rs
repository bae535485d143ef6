use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hivebox::{
    api::{self, AppState},
    cache::{CacheClient, ValkeyStore},
    config::Config,
    flush::FlushWorker,
    metrics::Metrics,
    readiness::ReadinessService,
    sensebox::SenseBoxClient,
    sensors::SensorService,
    storage::{RecordStore, S3ObjectStore},
    temperature::TemperatureService,
};

const BUCKET_CHECK_ATTEMPTS: u32 = 12;
const BUCKET_CHECK_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // `hivebox --openapi [path]` writes the API document and exits.
    let mut args = env::args().skip(1);
    if args.next().as_deref() == Some("--openapi") {
        return write_openapi(args.next().map(PathBuf::from));
    }

    // Env vars may also be set externally, so a missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        boxes = config.sensebox.box_ids.len(),
        cache = config.valkey.is_some(),
        storage = config.minio.is_some(),
        "Configuration loaded"
    );

    let metrics = Metrics::new()?;
    let sensebox = Arc::new(SenseBoxClient::new(&config.sensebox)?);

    // An unreachable cache only disables caching.
    let cache = match &config.valkey {
        Some(valkey) => match ValkeyStore::connect(valkey).await {
            Ok(store) => Some(CacheClient::new(Arc::new(store), metrics.clone())),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Valkey unavailable; caching disabled");
                None
            }
        },
        None => {
            info!("Valkey not configured; caching disabled");
            None
        }
    };

    let records = config.minio.as_ref().map(|minio| {
        RecordStore::new(
            Arc::new(S3ObjectStore::new(minio)),
            minio.create_bucket,
            metrics.clone(),
        )
    });

    if config.skip_minio_check {
        info!("Skipping object storage startup check");
    } else {
        let Some(records) = &records else {
            bail!("Object storage is not configured; set MINIO_ENDPOINT or SKIP_MINIO_CHECK=true");
        };
        records
            .ensure_bucket_with_retry(BUCKET_CHECK_ATTEMPTS, BUCKET_CHECK_DELAY)
            .await
            .context("Object storage startup check failed")?;
        info!("Object storage ready");
    }

    let flusher = Arc::new(FlushWorker::new(
        records.clone(),
        Duration::from_secs(config.flush_interval_secs),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_task = flusher.spawn(shutdown_rx);

    let temperature = Arc::new(TemperatureService::new(
        SensorService::new(sensebox.clone(), &config.sensebox),
        cache.clone(),
        records,
        flusher.clone(),
        config.cache,
    ));
    let readiness = Arc::new(ReadinessService::new(
        sensebox,
        config.sensebox.box_ids.clone(),
        cache,
        config.cache.ttl_secs,
        config.readiness_cache_max_age_secs,
    ));

    let state = AppState {
        temperature,
        flusher: flusher.clone(),
        readiness,
        metrics,
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the periodic loop, then drain whatever it has not written yet.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = flush_task {
        if let Err(e) = handle.await {
            warn!(error = %e, "Flush loop terminated abnormally");
        }
    }
    if let Some(count) = flusher.flush().await {
        info!(count, "Final flush complete");
    }

    Ok(())
}

fn write_openapi(output: Option<PathBuf>) -> Result<()> {
    let json = api::handlers::openapi_json()?;
    match output {
        Some(path) => {
            fs::write(&path, &json)
                .with_context(|| format!("Error writing to {}", path.display()))?;
            eprintln!("OpenAPI document written to {}", path.display());
        }
        None => io::stdout()
            .write_all(json.as_bytes())
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
