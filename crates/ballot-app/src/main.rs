// Ballot service entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database, resolve the current ballot (`--new-ballot` discards it)
// 4. Replay the journal (crash recovery)
// 5. Spawn the command loop
// 6. Serve WebSocket clients until Ctrl+C
// 7. Drain the command loop and exit

use ballot_app::app::{self, AppState};
use ballot_app::config;
use ballot_app::db;
use ballot_app::protocol::Envelope;
use ballot_app::ws_server;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Ballot service starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: authority={}, port={}",
        config.authority, config.ws_port
    );

    // 3. Open database and resolve the ballot
    let db = db::Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);
    if std::env::args().skip(1).any(|arg| arg == "--new-ballot") {
        db.clear_ballot().context("failed to discard stored ballot")?;
        info!("Discarded stored ballot, starting a new one");
    }
    let mut state = AppState::open(&config, db).context("failed to resolve ballot")?;

    // 4. Crash recovery
    match app::recover_from_db(&mut state) {
        Ok(true) => info!(
            "Ballot {} restored in phase {}",
            state.ballot_id,
            state.engine.current_phase()
        ),
        Ok(false) => info!("Ballot {} starting fresh", state.ballot_id),
        Err(e) => {
            error!("Crash recovery failed: {:#}", e);
            return Err(e.context("crash recovery failed"));
        }
    }

    // 5. Spawn the command loop
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let app_handle = tokio::spawn(app::run(rx, state));

    // 6. Serve until Ctrl+C
    let ws_port = config.ws_port;
    let ws_tx = tx.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_tx).await {
            error!("WebSocket server error: {:#}", e);
        }
    });
    info!("Ballot service ready on 127.0.0.1:{}", ws_port);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");

    // 7. Stop accepting, let queued requests finish, then stop the loop.
    ws_handle.abort();
    let _ = tx.send(Envelope::Shutdown).await;
    drop(tx);
    match tokio::time::timeout(std::time::Duration::from_secs(5), app_handle).await {
        Ok(Ok(state)) => info!(
            "Ballot {} left in phase {} with {} events",
            state.ballot_id,
            state.engine.current_phase(),
            state.engine.events().len()
        ),
        Ok(Err(e)) => error!("Command loop panicked: {}", e),
        Err(_) => error!("Command loop did not stop within 5s"),
    }

    info!("Ballot service shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to `logs/ballot.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("ballot.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ballot_app=info,ballot_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
