use std::sync::Arc;

use anyhow::{Error, Result};
use notification_gateway::{
    api::run_api_server,
    clients::{
        DeliveryChannel,
        broker::{Broker, InMemoryBroker},
        email::{EmailChannel, EmailConfig},
        rbmq::RabbitMqBroker,
        slack::{SlackChannel, SlackConfig},
        sms::{SmsChannel, SmsConfig},
    },
    config::{BrokerBackend, Config, LogFormat},
    gateway::{Gateway, GatewayOptions},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    init_tracing(config.log_format);

    let broker: Arc<dyn Broker> = match config.broker_backend {
        BrokerBackend::Amqp => Arc::new(RabbitMqBroker::connect(&config).await?),
        BrokerBackend::Memory => {
            info!("Using in-memory broker; notifications do not leave this process");
            Arc::new(InMemoryBroker::new())
        }
    };

    let channels: Vec<Arc<dyn DeliveryChannel>> = vec![
        Arc::new(EmailChannel::new(EmailConfig::from_config(&config))),
        Arc::new(SmsChannel::new(SmsConfig::from_config(&config))),
        Arc::new(SlackChannel::new(SlackConfig::from_config(&config))),
    ];

    let shutdown = CancellationToken::new();
    let gateway = Gateway::start(
        GatewayOptions::from_config(&config),
        broker,
        channels,
        shutdown.clone(),
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let served = run_api_server(gateway.state(), config.server_port, shutdown.clone()).await;

    shutdown.cancel();
    gateway.shutdown().await;

    served
}
