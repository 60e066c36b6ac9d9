use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roomsync::config::Config;
use roomsync::engine::{Engine, EngineEvent};
use roomsync::provider::GraphCalendarProvider;
use roomsync::rooms::{WalRoomRepository, default_rooms};
use roomsync::session::StaticSession;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    roomsync::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let rooms = Arc::new(WalRoomRepository::open(&config.rooms_log_path(), default_rooms())?);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let provider = Arc::new(GraphCalendarProvider::new(client, Url::parse(&config.graph_url)?));

    let session = Arc::new(StaticSession::new());
    match (config.identity(), config.access_token.clone()) {
        (Some(identity), Some(token)) => session.sign_in(identity, token),
        _ => warn!("ROOMSYNC_USER_EMAIL / ROOMSYNC_ACCESS_TOKEN not set, starting signed out"),
    }

    let engine = Arc::new(Engine::new(provider, session, rooms, config.engine_options()));

    info!("roomsync started");
    info!("  graph: {}", config.graph_url);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  time_zone: {}", config.time_zone);
    info!("  buffer: {} min", config.buffer_minutes);
    info!("  refresh: every {}s", config.refresh_every.as_secs());
    info!("  room admins: {}", config.admin_emails.len());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let shutdown = CancellationToken::new();
    let watcher = engine.watch_session(shutdown.child_token());
    let refresher = tokio::spawn(roomsync::refresher::run_refresher(
        engine.clone(),
        config.refresh_every,
        shutdown.child_token(),
    ));
    let notices = tokio::spawn(log_notices(engine.clone(), shutdown.child_token()));

    match engine.refresh().await {
        Ok(bookings) => {
            info!(bookings = bookings.len(), "initial refresh done");
            let today = chrono::Utc::now().with_timezone(&config.time_zone).date_naive();
            for (room_id, column) in engine.day_grid(today).await {
                let name = engine.room(&room_id).map(|r| r.name).unwrap_or_default();
                info!(room = %room_id, name = %name, events = column.len(), "today");
            }
            let stats = engine.stats().await;
            info!(
                bookings = stats.total_bookings,
                top_room = ?stats.top_room.as_ref().map(|t| t.name.as_str()),
                booked_hours = stats.booked_hours(),
                "usage"
            );
        }
        Err(e) => warn!(error = %e, "initial refresh failed"),
    }

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received");
    shutdown.cancel();
    for task in [watcher, refresher, notices] {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    info!("roomsync stopped");
    Ok(())
}

async fn log_notices(engine: Arc<Engine>, shutdown: CancellationToken) {
    let mut events = engine.subscribe();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(EngineEvent::Notice(notice)) => warn!(?notice, "engine notice"),
            Some(EngineEvent::SnapshotReplaced { .. }) => {}
            None => break,
        }
    }
}
