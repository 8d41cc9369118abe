use anyhow::Context;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use deskserver::automation::PassScheduler;
use deskserver::config::AppConfig;
use deskserver::shared::state::AppState;
use deskserver::shared::utils::create_conn;
use deskserver::tickets::configure_tickets_routes;
use deskserver::tickets::notify::DbNotificationSink;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env();
    let pool = create_conn(&config.database_url).context("failed to build database pool")?;

    {
        let mut conn = pool
            .get()
            .context("failed to get a database connection")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    }

    let notifier = Arc::new(DbNotificationSink::new(pool.clone()));
    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
        notifier,
    });

    PassScheduler::new(state.clone())?.start();

    let app = configure_tickets_routes()
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);

    let addr = config.bind_addr();
    info!("deskserver listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
