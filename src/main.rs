use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use tracing_subscriber::EnvFilter;

use notify_engine::{
    api::{AppState, run_api_server},
    channels::{
        ChannelRegistry, email::EmailChannel, inapp::InAppChannel, push::PushChannel,
        sms::SmsChannel,
    },
    clock::SystemClock,
    config::Config,
    engine::{
        dispatch::DispatchEngine,
        ingest::{DeliveryReceiptHook, IngestEngine},
        monitor::Monitor,
        scheduler::Scheduler,
    },
    store::{Store, memory::MemoryStore, postgres::PgStore},
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let config = Config::load()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let clock = Arc::new(SystemClock);
    let provider_timeout = Duration::from_secs(config.send_timeout_secs);

    let channels = Arc::new(
        ChannelRegistry::new()
            .register(Arc::new(InAppChannel::new(store.clone(), clock.clone())))
            .register(Arc::new(EmailChannel::new(
                config.email_provider_url.clone(),
                provider_timeout,
            )))
            .register(Arc::new(SmsChannel::new(
                config.sms_provider_url.clone(),
                provider_timeout,
            )))
            .register(Arc::new(PushChannel::new(
                config.push_provider_url.clone(),
                provider_timeout,
            ))),
    );

    let dispatch = Arc::new(DispatchEngine::new(
        store.clone(),
        channels,
        clock.clone(),
        config.dispatch_config(),
    ));

    let ingest = Arc::new(
        IngestEngine::new(store.clone(), clock.clone(), config.gateway_secrets())
            .with_hook(Arc::new(DeliveryReceiptHook::new(
                store.clone(),
                clock.clone(),
            ))),
    );

    let monitor = Arc::new(Monitor::new(
        store.clone(),
        clock.clone(),
        config.alert_rules(),
    ));

    let scheduler_config = config.scheduler_config();
    let stats_window = scheduler_config.stats_window;

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        dispatch,
        monitor.clone(),
        clock,
        scheduler_config,
    ));
    tokio::spawn(scheduler.run());

    let state = Arc::new(AppState {
        ingest,
        monitor,
        store,
        stats_window,
    });

    run_api_server(state, config.server_port)
        .await
        .map_err(|e| anyhow::anyhow!("API server failed: {}", e))?;

    Ok(())
}
