use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use turnero::audit::JournalAuditTrail;
use turnero::calendar::ShopConfig;
use turnero::compactor::run_compactor;
use turnero::config::Settings;
use turnero::directory::{Directory, InMemoryDirectory, TrustingDirectory};
use turnero::engine::{Engine, EngineOptions};
use turnero::notify::NotifyHub;
use turnero::validator::AppointmentSource;
use turnero::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    turnero::observability::init(settings.metrics_port)?;

    std::fs::create_dir_all(&settings.data_dir)?;

    let directory: Arc<dyn Directory> = match &settings.directory {
        Some(path) => Arc::new(InMemoryDirectory::from_json_file(path)?),
        None => Arc::new(TrustingDirectory),
    };
    let audit = Arc::new(JournalAuditTrail::open(&settings.audit_path())?);
    let engine = Arc::new(Engine::new(
        settings.wal_path(),
        Arc::new(NotifyHub::new()),
        audit,
        directory,
        EngineOptions {
            zone: settings.zone,
            policy: settings.policy,
        },
    )?);

    if let Some(path) = &settings.shop_config
        && engine.load_shop_config().await.is_err()
    {
        engine.configure_shop(ShopConfig::from_json_file(path)?).await?;
        info!("shop schedule loaded from {}", path.display());
    }

    tokio::spawn(run_compactor(engine.clone(), settings.compact_threshold));

    let max_connections = settings.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("turnero listening on {addr}");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  time zone: {}", settings.zone.tz().name());
    info!("  transitions: v{}", settings.policy.version());
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", settings.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(turnero::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(turnero::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(turnero::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(turnero::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("turnero stopped");
    Ok(())
}
