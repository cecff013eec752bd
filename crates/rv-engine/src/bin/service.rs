use rv_engine::{build_scheduler, service, ServiceConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for interrupts");
            std::future::pending::<()>().await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        addr = %config.addr,
        workers = config.workers,
        data_dir = %config.data_dir.display(),
        "starting rivulet service"
    );

    let scheduler = build_scheduler(&config)?;
    let listener = TcpListener::bind(&config.addr).await?;
    service::serve(listener, scheduler.clone(), interrupted()).await?;

    scheduler.shutdown();
    Ok(())
}
