use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod http;
mod sink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime_gateway=info,chime_engine=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > CHIME_CONFIG env > ~/.chime/chime.toml
    let config_path = std::env::var("CHIME_CONFIG").ok();
    let config = chime_core::ChimeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        chime_core::ChimeConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = chime_store::open_db(&db_path)?;
    chime_store::init_db(&db)?;
    info!("database migrations complete");

    // each store wraps its own connection
    let pending = Arc::new(chime_store::PendingStore::new(chime_store::open_db(
        &db_path,
    )?));
    let flags = Arc::new(chime_store::DeliveryFlagStore::new(chime_store::open_db(
        &db_path,
    )?));

    let alarm_sink = sink::build_sink(&config);
    let gate = Arc::new(sink::ConfigGate::new(config.alarms.exact_enabled));
    let engine = chime_engine::AlarmEngine::new(
        pending,
        flags,
        alarm_sink,
        gate,
        chime_engine::EngineConfig {
            margin: std::time::Duration::from_secs(config.alarms.margin_secs),
            degraded_margin: std::time::Duration::from_secs(config.alarms.degraded_margin_secs),
        },
    )?;

    // rebuild timer state from the store before accepting requests
    engine.recover().await?;

    let state = Arc::new(app::AppState::new(config, engine.clone()));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Chime gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    // abort armed timers on the way out
    engine.shutdown();
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
