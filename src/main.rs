use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use invoice_rabbitmq::config::{self, InvoiceRabbitConfig};
use invoice_rabbitmq::env::Config;
use invoice_rabbitmq::rabbitmq::{
    ConnectionManager, EventPublisher, InvoiceEventType, LapinConnector,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct SampleInvoice {
    id: u32,
    description: String,
    supplier: String,
    due_date: DateTime<Utc>,
    lines: Vec<SampleInvoiceLine>,
}

#[derive(Debug, Serialize)]
struct SampleInvoiceLine {
    description: String,
    price: f64,
    quantity: u32,
}

fn sample_invoice() -> SampleInvoice {
    let now = Utc::now();
    let stamp = now.format("%Y%m%d-%H%M");
    SampleInvoice {
        id: 1,
        description: format!("Description-{}", stamp),
        supplier: format!("Supplier-{}", stamp),
        due_date: now + chrono::Duration::days(4),
        lines: vec![SampleInvoiceLine {
            description: format!("Line-{}", stamp),
            price: 250.0,
            quantity: 1,
        }],
    }
}

fn load_settings() -> Result<InvoiceRabbitConfig> {
    match config::find_config_file() {
        Ok(path) => config::load_config_from(&path),
        Err(e) => {
            info!("{}; falling back to environment", e);
            let settings: InvoiceRabbitConfig = Config::load()?.into();
            settings.validate()?;
            Ok(settings)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    if let Some(flag) = args.next() {
        if flag == "--init-config" {
            let path = args
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME));
            return config::create_default_config_file(&path);
        }
        warn!("Ignoring unknown argument {}", flag);
    }

    let settings = load_settings().context("Failed to load RabbitMQ configuration")?;
    let manager = Arc::new(ConnectionManager::new(
        LapinConnector::new(settings.lapin_config()),
        settings.topology.clone(),
    ));
    let publisher = EventPublisher::new(Arc::clone(&manager));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let invoice = sample_invoice();
    let outcome = publisher
        .publish(InvoiceEventType::Created.as_str(), &invoice, &cancel)
        .await;

    manager.close().await;

    match outcome {
        Ok(()) => {
            info!(invoice_id = invoice.id, "Producer published invoice event");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "Publishing invoice event failed");
            Err(e.into())
        }
    }
}
