use anyhow::Context;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use hubledger::{api, config::Config, db::init_db, InboundMessage, NdjsonPublisher, Repository};
use hubledger::{SwitchError, TransferHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // stdout carries the outbound bus, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));
    let handler = TransferHandler::new(
        repo.clone(),
        Arc::new(NdjsonPublisher::stdout()),
        config.handler.clone(),
    );

    let app = api::create_router(api::AppState::new(repo));
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    info!("Health server listening on {}", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "health server stopped");
        }
    });

    let max_elapsed = Duration::from_millis(config.retry_max_elapsed_ms);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable inbound message");
                continue;
            }
        };
        let kind = message.kind();
        if let Err(e) = handle_with_retry(&handler, message, max_elapsed).await {
            error!(kind, error = %e, "dropping message after failure");
        }
    }

    info!("Inbound stream closed");
    Ok(())
}

/// Redeliver while the handler reports an infrastructure error.
async fn handle_with_retry(
    handler: &TransferHandler,
    message: InboundMessage,
    max_elapsed: Duration,
) -> Result<(), SwitchError> {
    let backoff = ExponentialBackoff {
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    };

    retry(backoff, || async {
        match handler.handle(message.clone()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => Err(backoff::Error::transient(e)),
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    })
    .await
}
