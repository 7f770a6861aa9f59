//! The snc-meister admission server.
//!
//! Binds the RPC listener, serves admission requests serially, and exits
//! cleanly on SIGTERM/SIGINT. All configuration comes from
//! `snc-meister.toml` and `SNCM_*` environment variables; there are no
//! command-line flags.

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use snc_meister::enforcer::NetEnforcer;
use snc_meister::{Controller, MeisterConfig};

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!(%err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> snc_meister::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = MeisterConfig::load()?;
    info!(?config, "starting snc-meister");

    let enforcer = NetEnforcer::new(config.enforcer_port, config.enforcer_timeout());
    let mut controller = Controller::new(config.algorithm, enforcer);

    let listener = TcpListener::bind(&config.listen).await?;
    snc_meister::rpc::serve(listener, &mut controller, shutdown_signal()).await?;

    info!(metrics = ?controller.metrics(), "snc-meister exiting");
    Ok(())
}
