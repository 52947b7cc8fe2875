//! Durable store connection.
//!
//! SQLite allows one writer at a time, so writes share a single connection
//! while reads fan out over a read-only pool. WAL journaling lets the two
//! proceed side by side.

use std::str::FromStr;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::config::settings::StoreSettings;

#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Opens both pools. Migrations run on the writer before any reader
    /// connection exists, so readers never see a partial schema.
    pub async fn open(store: &StoreSettings) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&store.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(store.busy_timeout);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("./migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(store.read_connections)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }

    /// Closes both pools, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

/// Opens the store at `database_url` with default pool sizing.
pub async fn connect(database_url: &str) -> Result<DatabasePool, sqlx::Error> {
    DatabasePool::open(&StoreSettings::new(database_url)).await
}
