use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::watch};
use tracing::{error, info};

use ecommerce_payments as app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Stores
    let orders: Arc<dyn app::repositories::OrderRepository> =
        Arc::new(app::repositories::SqlOrderRepository::new(db.clone()));
    let payment_requests: Arc<dyn app::repositories::PaymentRequestRepository> = Arc::new(
        app::repositories::SqlPaymentRequestRepository::new(db.clone()),
    );

    // Channel + topology
    let topology = app::messaging::Topology::payment(cfg.message_ttl());
    let channel: Arc<dyn app::messaging::MessageChannel> =
        Arc::new(app::messaging::InMemoryChannel::new(topology));
    channel.declare_topology().await?;

    let publisher = Arc::new(app::messaging::MessagePublisher::new(
        channel.clone(),
        payment_requests.clone(),
        orders.clone(),
    ));
    let gateway: Arc<dyn app::gateway::PaymentGateway> = Arc::new(
        app::gateway::SimulatedGateway::new(cfg.gateway_decline_rate, cfg.gateway_fault_rate),
    );
    let notifications: Arc<dyn app::services::notifications::NotificationService> =
        Arc::new(app::services::notifications::LogNotificationService);

    let consumer = Arc::new(app::messaging::PaymentRequestConsumer::new(
        channel.clone(),
        orders.clone(),
        payment_requests.clone(),
        gateway,
        notifications,
        publisher.clone(),
        cfg.gateway_timeout(),
        cfg.consumer_config(),
    ));
    let sweeper = app::messaging::RetrySweeper::new(
        payment_requests.clone(),
        publisher.clone(),
        cfg.retry_sweep_interval(),
        cfg.retry_cooldown(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx.clone()));
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));

    info!("payment worker up");
    shutdown_signal().await;
    info!("shutdown signal received; stopping workers");

    let _ = shutdown_tx.send(true);
    let _ = consumer_task.await;
    let _ = sweeper_task.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
