//! Binary entry point: wire the stores and services, start the relay and
//! snapshot tasks, and serve.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tribuna_core::analytics::AnalyticsService;
use tribuna_core::chat::ChatService;
use tribuna_core::db;
use tribuna_core::events::EventService;
use tribuna_core::hot::HotStore;
use tribuna_core::polls::PollService;
use tribuna_core::presence::PresenceTracker;
use tribuna_core::questions::QuestionService;
use tribuna_core::sessions::SessionStore;
use tribuna_core::users::UserService;
use tribuna_core::validate::MessageValidator;

use tribuna_server::infra::app_state::AppState;
use tribuna_server::infra::config::{Args, Config};
use tribuna_server::routes::create_router;
use tribuna_server::snapshot;
use tribuna_server::ws::hub::BroadcastHub;
use tribuna_server::ws::poll_timers::PollAutoClose;
use tribuna_server::ws::relay::{self, RelayHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_args(&args));

    let pool = db::connect_pool(&config.database.url, config.database.max_connections).await?;
    let sessions_hot = HotStore::connect(&config.hot_store.sessions_url()).await?;
    let presence_hot = HotStore::connect(&config.hot_store.presence_url()).await?;
    let cache = HotStore::connect(&config.hot_store.cache_url()).await?;

    let sessions = SessionStore::new(sessions_hot);
    let presence = PresenceTracker::new(presence_hot, pool.clone())
        .with_window(config.realtime.presence_window_secs)
        .with_writeback_interval(config.realtime.ping_writeback_secs);
    let validator = MessageValidator::new(cache.clone());
    let questions = QuestionService::new(pool.clone());
    let polls = PollService::new(pool.clone(), cache.clone());
    let chat = ChatService::new(pool.clone(), cache.clone())
        .with_ring_max(config.realtime.chat_ring_max);
    let events = EventService::new(pool.clone());
    let users = UserService::new(pool.clone());
    let analytics = AnalyticsService::new(pool.clone(), presence.clone());

    let hub = Arc::new(BroadcastHub::new());
    let relay = if config.realtime.broadcast_pubsub {
        relay::spawn(
            config.hot_store.cache_url(),
            hub.clone(),
            config.realtime.relay_buffer,
        )
    } else {
        RelayHandle::disabled()
    };
    let poll_timers = Arc::new(PollAutoClose::new());
    let (snapshots, snapshot_rx) = snapshot::channel();

    let state = AppState {
        config: config.clone(),
        pool,
        cache,
        sessions,
        presence,
        validator,
        questions,
        polls,
        chat,
        events,
        users,
        analytics,
        hub,
        relay,
        poll_timers,
        snapshots,
    };

    snapshot::spawn(state.clone(), snapshot_rx);

    let addr = config.server.bind_addr()?;
    let app = create_router(state);

    info!("Tribuna realtime server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
