use std::{sync::Arc, time::Instant};

use anyhow::Context;
use axum::Router;
use tower_http::trace::TraceLayer;

use taskbot_core::{
    audit::AuditLogger,
    config::Config,
    dispatcher::UpdateDispatcher,
    menu::MenuService,
    messaging::{
        port::BotGateway,
        throttled::{ThrottleConfig, ThrottledGateway},
    },
    notifier::NotificationScheduler,
    polling::PollingManager,
    settings::SettingsService,
    store::{MemoryStore, TaskStore},
};
use taskbot_telegram::{
    router::{build_router, AppState},
    TelegramGateway,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbot_core::logging::init("taskbot")?;

    let cfg = Config::load().context("loading configuration")?;
    let audit = Arc::new(match &cfg.audit_log_path {
        Some(path) => AuditLogger::with_file(path, cfg.audit_log_json),
        None => AuditLogger::in_memory(),
    });

    let store: Arc<dyn TaskStore> = Arc::new(
        MemoryStore::open(&cfg.store_path)
            .with_context(|| format!("opening store {}", cfg.store_path.display()))?,
    );

    let telegram = TelegramGateway::new(cfg.http_timeout, audit.clone())?;
    let gateway: Arc<dyn BotGateway> = Arc::new(ThrottledGateway::new(
        Arc::new(telegram),
        ThrottleConfig::default(),
    ));

    let menus = Arc::new(MenuService::new(store.clone(), gateway.clone(), cfg.menu()?));
    let dispatcher = Arc::new(UpdateDispatcher::new(
        store.clone(),
        gateway.clone(),
        menus.clone(),
        audit.clone(),
    ));
    let polling = PollingManager::new(
        cfg.polling(),
        store.clone(),
        gateway.clone(),
        dispatcher.clone(),
        audit.clone(),
    );
    let settings = Arc::new(SettingsService::new(
        store.clone(),
        polling.clone(),
        menus.clone(),
    ));
    let scheduler = NotificationScheduler::new(cfg.scheduler(), store, menus, audit.clone());

    scheduler.start().await;

    if cfg.polling_enabled {
        let polling = polling.clone();
        let delay = cfg.polling_start_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match polling.start_polling().await {
                Ok(n) => tracing::info!(loops = n, "polling started"),
                Err(e) => tracing::error!("failed to start polling: {e}"),
            }
        });
    } else {
        tracing::info!("polling disabled; expecting webhook deliveries");
    }

    let state = AppState {
        gateway,
        dispatcher,
        polling: polling.clone(),
        settings,
        audit,
        webhook_url: cfg.webhook_url(),
        started: Instant::now(),
    };
    let app = Router::new()
        .nest("/api/telegram", build_router(state))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, webhook = %cfg.webhook_url(), "taskbot listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    polling.shutdown().await;
    scheduler.stop().await;
    tracing::info!("taskbot stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        // Without a signal handler, keep serving until the process is killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
