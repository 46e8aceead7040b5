//! Test helpers for monument catalog integration tests
//!
//! - Throwaway PostgreSQL databases with migrations applied
//! - Byte stores rooted in temporary directories
//! - RINEX and KML fixture builders

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod fixtures;

use monument_catalog::config::IngestConfig;
use monument_catalog::geodesy::Wgs84Transform;
use monument_catalog::ingest::Ingestor;
use monument_catalog::storage::{ByteStore, LocalStore};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub use fixtures::*;

/// A database created for one test and dropped by [`TestDb::cleanup`]
pub struct TestDb {
    pool: PgPool,
    admin_url: String,
    database_name: String,
}

fn with_database(url: &str, database: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let prefix = base.rsplit_once('/').map(|(p, _)| p).unwrap_or(base);
    match query {
        Some(query) => format!("{}/{}?{}", prefix, database, query),
        None => format!("{}/{}", prefix, database),
    }
}

impl TestDb {
    /// Create a fresh database next to the one named by `DATABASE_URL`.
    ///
    /// Returns `None` when `DATABASE_URL` is unset so tests can skip on
    /// machines without PostgreSQL.
    pub async fn try_new() -> Option<Self> {
        let admin_url = std::env::var("DATABASE_URL").ok()?;
        let database_name = format!("monument_test_{}", Uuid::new_v4().simple());

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&admin_url)
            .await
            .expect("Failed to connect to PostgreSQL");
        sqlx::query(&format!("CREATE DATABASE {}", database_name))
            .execute(&admin)
            .await
            .expect("Failed to create test database");
        admin.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&with_database(&admin_url, &database_name))
            .await
            .expect("Failed to connect to test database");

        monument_catalog::db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        Some(Self {
            pool,
            admin_url,
            database_name,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_cloned(&self) -> PgPool {
        self.pool.clone()
    }

    /// Close the pool and drop the database
    pub async fn cleanup(self) {
        self.pool.close().await;
        if let Ok(admin) = PgPoolOptions::new().max_connections(1).connect(&self.admin_url).await {
            let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", self.database_name))
                .execute(&admin)
                .await;
            admin.close().await;
        }
    }
}

/// Local byte store in a temporary directory
pub async fn temp_store() -> (TempDir, Arc<dyn ByteStore>) {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::new(dir.path().join("media")).await.unwrap();
    (dir, Arc::new(store))
}

pub fn test_config() -> IngestConfig {
    IngestConfig::default()
}

pub fn ingestor(pool: PgPool, store: Arc<dyn ByteStore>) -> Ingestor {
    Ingestor::new(pool, store, Arc::new(Wgs84Transform), test_config())
}
