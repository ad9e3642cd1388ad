use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Error, Result};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dispatch_service::api::{run_api_server, AppState};
use dispatch_service::breaker::CircuitBreaker;
use dispatch_service::clients::health::HealthChecker;
use dispatch_service::clients::redis::RedisStatusStore;
use dispatch_service::clients::relay::HttpRelaySink;
use dispatch_service::clients::template::TemplateServiceClient;
use dispatch_service::clients::user::UserServiceClient;
use dispatch_service::config::Config;
use dispatch_service::models::message::Channel;
use dispatch_service::queue::rabbitmq::RabbitMqQueue;
use dispatch_service::router::NotificationRouter;
use dispatch_service::sink::DeliverySink;
use dispatch_service::store::StatusStore;
use dispatch_service::worker::DeliveryWorker;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let queue = Arc::new(RabbitMqQueue::connect(&config).await?);
    let store: Arc<dyn StatusStore> = Arc::new(RedisStatusStore::connect(&config).await?);
    let users = Arc::new(UserServiceClient::new(&config)?);
    let templates = Arc::new(TemplateServiceClient::new(&config)?);

    let mut breakers: HashMap<Channel, Arc<CircuitBreaker>> = HashMap::new();
    for channel in Channel::ALL {
        breakers.insert(
            channel,
            Arc::new(CircuitBreaker::new(
                channel.as_str(),
                config.circuit_breaker_config(),
            )),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    for channel in Channel::ALL {
        let relay_url = match channel {
            Channel::Email => config.email_relay_url.clone(),
            Channel::Push => config.push_relay_url.clone(),
        };
        let sink: Arc<dyn DeliverySink> = Arc::new(
            HttpRelaySink::new(channel, relay_url, config.sink_timeout())
                .map_err(|e| anyhow::anyhow!("failed to build {} sink: {}", channel, e))?,
        );

        let worker = Arc::new(DeliveryWorker::new(
            channel,
            Arc::clone(&queue) as _,
            Arc::clone(&store),
            Arc::clone(&templates) as _,
            sink,
            Arc::clone(&breakers[&channel]),
            config.worker_settings(),
        ));

        worker_handles.extend(worker.spawn_pool(config.worker_concurrency, shutdown_rx.clone()));
    }

    let router = NotificationRouter::new(
        Arc::clone(&queue) as _,
        Arc::clone(&store),
        users,
    );

    let state = Arc::new(AppState {
        router,
        store,
        health_checker: HealthChecker::new(config.clone(), breakers),
    });

    let api_handle = tokio::spawn(run_api_server(
        config.server_port,
        state,
        shutdown_rx.clone(),
    ));

    info!(
        channels = ?Channel::ALL,
        concurrency = config.worker_concurrency,
        "Dispatch service running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining workers");

    let _ = shutdown_tx.send(true);

    for handle in worker_handles {
        let _ = handle.await;
    }

    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(anyhow::anyhow!("API server error: {}", e)),
        Err(e) => return Err(anyhow::anyhow!("API server task failed: {}", e)),
    }

    info!("Dispatch service stopped");

    Ok(())
}
