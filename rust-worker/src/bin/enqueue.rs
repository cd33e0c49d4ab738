//! Report Enqueue - publish one report request.
//!
//! Operator tool for the producing side: it declares the same topology as the
//! worker and publishes a persistent report request to the exchange.
//!
//! ```text
//! report-enqueue --bucket reports --key reports/tasks-20240101-120000.csv --recipient a@x.com
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reportmail::queue::ReportMessage;
use reportmail::{BrokerConfig, BrokerTopology, Publisher};

#[derive(Debug, Parser)]
#[command(name = "report-enqueue", about = "Publish a report request for the report worker")]
struct Args {
    /// Bucket holding the report
    #[arg(long, env = "AWS_S3_BUCKET")]
    bucket: String,

    /// Object key of the report
    #[arg(long)]
    key: String,

    /// Recipient email address
    #[arg(long, short = 'r', env = "DEFAULT_RECIPIENT_EMAIL")]
    recipient: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let args = Args::parse();
    let config = BrokerConfig::from_env().context("Invalid broker configuration")?;

    // Validate with the same rules the worker applies
    let request = ReportMessage {
        storage_bucket: Some(args.bucket),
        storage_key: Some(args.key),
        recipient_email: Some(args.recipient),
    }
    .validate()
    .context("Invalid report request")?;

    let publisher = Publisher::new(config.url.clone(), BrokerTopology::from(&config));
    let result = publisher.publish_report(&request).await;
    publisher.close().await;

    let message_id = result?;

    info!(
        message_id = %message_id,
        bucket = %request.storage_bucket,
        key = %request.storage_key,
        recipient = %request.recipient_email,
        "report_enqueued"
    );

    Ok(())
}
