// Faceoff server entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config
// 3. Open database, seed the roster on first run
// 4. Rebuild point totals if they are stale or the schedule changed
// 5. Serve WebSocket clients until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use faceoff_app::App;
use faceoff_core::config::{self, Config};
use faceoff_core::db::Database;
use faceoff_core::roster;
use faceoff_core::scoring::ScoreReconciler;
use faceoff_core::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Faceoff server starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: roster={}, schedule={:?}",
        config.roster_path.display(),
        config.schedule.values()
    );

    // 3. Open database and seed the roster
    let db = open_database(&config)?;
    seed_roster(&db, &config)?;

    // 4. Bring point totals in line with the stored submissions
    let reconciler = ScoreReconciler::new(config.schedule.clone(), config.retry);
    if let Some(report) = reconciler
        .refresh_totals(&db)
        .context("failed to refresh point totals")?
    {
        info!(
            "Rebuilt point totals from {} submission(s)",
            report.submissions_applied
        );
    }

    // 5. Serve clients
    let app = Arc::new(App::new(Arc::new(db), reconciler));
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket server on {bind_addr}"))?;

    tokio::select! {
        result = ws_server::run(listener, app) => {
            if let Err(e) = result {
                error!("WebSocket server error: {e}");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    info!("Faceoff server shut down cleanly");
    Ok(())
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let path = config.db_path.to_string_lossy();
    let db = Database::open(&path).context("failed to open database")?;
    info!("Database opened at {path}");
    Ok(db)
}

fn seed_roster(db: &Database, config: &Config) -> anyhow::Result<()> {
    let entities = roster::load_roster(&config.roster_path)
        .with_context(|| format!("failed to load roster from {}", config.roster_path.display()))?;
    let inserted = db
        .seed_roster(&entities, roster::roster_modified_at(&config.roster_path))
        .context("failed to seed roster")?;

    if inserted > 0 {
        info!("Seeded {inserted} entities");
    } else {
        let stored = db.entity_count()?;
        if stored != entities.len() {
            warn!(
                "Roster file lists {} entities but the database holds {stored}; keeping the database roster",
                entities.len()
            );
        }
        info!("Using existing roster of {stored} entities");
    }
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("faceoff=info,faceoff_core=info,faceoff_app=info,warn")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
