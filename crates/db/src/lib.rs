use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use utils_core::assets::database_path;

pub mod entities;
pub mod models;
pub mod types;

pub use sea_orm::{DbErr, TransactionTrait};

pub type DbPool = DatabaseConnection;

#[derive(Clone)]
pub struct DBService {
    pub pool: DbPool,
}

fn database_url() -> String {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
        _ => format!("sqlite://{}?mode=rwc", database_path().to_string_lossy()),
    }
}

impl DBService {
    pub async fn new() -> Result<DBService, DbErr> {
        Self::connect(&database_url()).await
    }

    pub async fn connect(database_url: &str) -> Result<DBService, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .acquire_timeout(Duration::from_secs(30))
            .sqlx_logging(false);
        // An in-memory SQLite database exists per connection.
        if database_url.contains(":memory:") {
            options.max_connections(1).min_connections(1);
        }

        let pool = Database::connect(options).await?;
        db_migration::Migrator::up(&pool, None).await?;
        tracing::debug!(database_url, "Database ready");
        Ok(DBService { pool })
    }
}
