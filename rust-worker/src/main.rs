//! Report Worker - async RabbitMQ consumer that emails task reports.
//!
//! This worker consumes report requests from the configured queue, fetches
//! each report from object storage and sends it to the recipient. A small
//! health endpoint runs alongside the consumer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reportmail::consumer::{self, ConsumerExit};
use reportmail::util::cancel_on_signal;
use reportmail::{web, Config, MailgunNotifier, ReportProcessor, S3Fetcher, StartupError};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("worker_starting");

    // One signal listener for the whole process, installed before startup
    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let config = Config::from_env().map_err(StartupError::from)?;
    info!(
        rabbitmq_url_set = !config.broker.url.is_empty(),
        exchange = %config.broker.exchange,
        queue = %config.broker.queue,
        routing_key = %config.broker.routing_key,
        prefetch = config.broker.prefetch,
        storage_endpoint = %config.storage.endpoint,
        delivery_mode = ?config.mail.mode,
        port = config.port,
        "config_loaded"
    );

    // One HTTP client shared by the fetcher and the notifier
    let client = Client::builder()
        .pool_max_idle_per_host(16)
        .build()
        .map_err(StartupError::from)?;

    let fetcher = S3Fetcher::new(client.clone(), &config.storage, config.request_timeout);
    let notifier = MailgunNotifier::new(client, &config.mail, config.request_timeout);
    let processor = Arc::new(ReportProcessor::new(Arc::new(fetcher), Arc::new(notifier)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health endpoint")?;
    info!(address = %addr, "health_server_listening");

    let health_shutdown = shutdown.clone();
    let health = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, web::router())
            .with_graceful_shutdown(health_shutdown.cancelled_owned())
            .await
        {
            error!(error = %e, "health_server_error");
        }
    });

    let exit = consumer::run(&config.broker, processor, shutdown).await;

    match exit {
        Ok(ConsumerExit::Shutdown) => {
            if let Err(e) = health.await {
                error!(error = %e, "health_server_join_failed");
            }
            info!("worker_stopped");
            Ok(())
        }
        Ok(ConsumerExit::StreamClosed) => {
            health.abort();
            bail!("RabbitMQ closed the consumer stream")
        }
        Err(e) => {
            health.abort();
            error!(error = %e, "worker_startup_failed");
            Err(e.into())
        }
    }
}
