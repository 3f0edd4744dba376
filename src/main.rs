use std::sync::Arc;

use anyhow::Context;
use huddle::{
    chat::{MemoryMessageStore, MessageStore, SqliteMessageStore},
    config::{ArchiveKind, Config},
    AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huddle=info")),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn MessageStore> = match config.archive {
        ArchiveKind::Sqlite => {
            let db_pool = SqlitePoolOptions::new()
                .max_connections(config.db_pool_size())
                .connect(&config.database_url)
                .await
                .with_context(|| format!("opening chat archive at {}", config.database_url))?;
            Arc::new(SqliteMessageStore::new(db_pool).await?)
        }
        ArchiveKind::Memory => {
            tracing::warn!("chat archive is in memory; transcripts are lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, archive = ?config.archive, "listening");

    let app = huddle::router(AppState::new(config, store));
    axum::serve(listener, app).await?;

    Ok(())
}
