use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use glance_api::controllers::glanceapi_controller::{self, State};
use glance_api::util::{config::OperatorConfig, telemetry};

mod handlers;
mod server;

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = OperatorConfig::from_env()?;
    telemetry::init(config.log_json).await?;

    // Initialize Kubernetes controller state
    let state = State::default();
    let cancel = state.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested, finishing in-flight passes");
        cancel.cancel();
    });

    let controller = glanceapi_controller::run(state.clone(), config.clone());
    let server = server::start_server(state, &config.bind_address);

    // Both sides shut down gracefully, so poll until both are done
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server
}
