//! Database layer for StudyForge
//!
//! Provides:
//! - SeaORM entity models (generation lock table)
//! - Connection pool management
//! - Schema bootstrap

pub mod models;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection
    pub primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let mut primary_opts = ConnectOptions::new(&config.url);
        primary_opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let primary = Database::connect(primary_opts)
            .await
            .map_err(|e| AppError::Internal {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { primary })
    }

    /// Wrap an existing connection
    pub fn from_connection(primary: DatabaseConnection) -> Self {
        Self { primary }
    }

    /// Get the connection
    pub fn conn(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Create the tables this service owns if they do not exist yet
    pub async fn apply_schema(&self) -> Result<()> {
        self.primary
            .execute_unprepared(models::GENERATION_LOCKS_DDL)
            .await?;
        info!("Database schema ready");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::Internal {
                message: format!("Primary ping failed: {}", e),
            })?;

        Ok(())
    }
}
