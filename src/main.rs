use apexfeed::{Config, Worker, WorkerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_CLEAN: i32 = 0;
const EXIT_UNEXPECTED: i32 = 1;
const EXIT_BAD_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,apexfeed=info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err @ WorkerError::MissingConfig { .. }) => {
            error!(error = %err, "missing required configuration");
            std::process::exit(EXIT_BAD_CONFIG);
        }
        Err(err) => {
            error!(error = %err, "configuration error");
            std::process::exit(EXIT_UNEXPECTED);
        }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let mut worker = match Worker::new(config, shutdown).await {
        Ok(worker) => worker,
        Err(err) => {
            error!(error = %err, "worker startup failed");
            std::process::exit(EXIT_UNEXPECTED);
        }
    };

    match worker.run().await {
        Ok(()) => {
            info!("worker shut down cleanly");
            std::process::exit(EXIT_CLEAN);
        }
        Err(err) => {
            error!(error = %err, "worker exited with error");
            std::process::exit(EXIT_UNEXPECTED);
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("shutdown requested");
        shutdown.cancel();
    });
}
