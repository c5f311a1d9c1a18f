//! Persistent storage for routing state
//!
//! SQLite persistence for per-arm snapshots (bandit posterior plus preference
//! estimates), so a router can keep learning across process restarts. The
//! router writes through this store in the background; nothing on the
//! selection path waits for it.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use super::bandit::PosteriorSnapshot;
use super::preference::PreferenceEstimate;
use crate::error::{Error, Result};

/// SQL to create the arm snapshot table
pub const CREATE_ARM_SNAPSHOTS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS arm_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    router_name TEXT NOT NULL,
    arm_id TEXT NOT NULL,
    pulls INTEGER NOT NULL DEFAULT 0,
    snapshot_json TEXT NOT NULL,
    taken_at INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(router_name, arm_id)
);

CREATE INDEX IF NOT EXISTS idx_arm_snapshots_router ON arm_snapshots(router_name);
"#;

/// Upsert that never replaces a row with an older snapshot
const UPSERT_SNAPSHOT_SQL: &str = r#"
INSERT INTO arm_snapshots (router_name, arm_id, pulls, snapshot_json, taken_at, updated_at)
VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
ON CONFLICT(router_name, arm_id) DO UPDATE SET
    pulls = excluded.pulls,
    snapshot_json = excluded.snapshot_json,
    taken_at = excluded.taken_at,
    updated_at = CURRENT_TIMESTAMP
WHERE excluded.taken_at >= arm_snapshots.taken_at
"#;

/// Read-only copy of everything the router has learned about one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub arm_id: String,
    /// Bandit state, absent if the bandit has never seen the arm
    pub posterior: Option<PosteriorSnapshot>,
    /// Preference estimates keyed by metric
    #[serde(default)]
    pub preferences: HashMap<String, PreferenceEstimate>,
    pub taken_at: DateTime<Utc>,
}

impl ArmSnapshot {
    /// Number of bandit updates folded into this snapshot
    pub fn pulls(&self) -> u64 {
        match &self.posterior {
            Some(PosteriorSnapshot::Thompson(p)) => p.pulls,
            Some(PosteriorSnapshot::Ucb(s)) => s.pull_count,
            None => 0,
        }
    }
}

/// Store for persisting arm snapshots
#[derive(Debug, Clone)]
pub struct RoutingStore {
    pool: SqlitePool,
}

impl RoutingStore {
    /// Create a new store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new store and connect to the database, creating the file if needed
    pub async fn connect(database_path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_ARM_SNAPSHOTS_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        info!("Arm snapshot table initialized");
        Ok(())
    }

    /// Save one arm's snapshot, unless the stored one was taken later
    ///
    /// Returns whether the row was written.
    pub async fn save_snapshot(&self, router_name: &str, snapshot: &ArmSnapshot) -> Result<bool> {
        let json = serde_json::to_string(snapshot)?;

        let result = sqlx::query(UPSERT_SNAPSHOT_SQL)
            .bind(router_name)
            .bind(&snapshot.arm_id)
            .bind(snapshot.pulls() as i64)
            .bind(json)
            .bind(snapshot.taken_at.timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        if result.rows_affected() == 0 {
            debug!(
                router = %router_name,
                arm_id = %snapshot.arm_id,
                taken_at = %snapshot.taken_at,
                "Stored snapshot is newer, skipped save"
            );
            return Ok(false);
        }

        debug!(
            router = %router_name,
            arm_id = %snapshot.arm_id,
            pulls = snapshot.pulls(),
            "Saved arm snapshot"
        );
        Ok(true)
    }

    /// Save multiple snapshots atomically
    pub async fn save_all(&self, router_name: &str, snapshots: &[ArmSnapshot]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        for snapshot in snapshots {
            let json = serde_json::to_string(snapshot)?;
            sqlx::query(UPSERT_SNAPSHOT_SQL)
                .bind(router_name)
                .bind(&snapshot.arm_id)
                .bind(snapshot.pulls() as i64)
                .bind(json)
                .bind(snapshot.taken_at.timestamp_micros())
                .execute(&mut *tx)
                .await
                .map_err(Error::DatabaseError)?;
        }

        tx.commit().await.map_err(Error::DatabaseError)?;

        info!(router = %router_name, count = snapshots.len(), "Saved arm snapshots");
        Ok(())
    }

    /// Load every snapshot saved under `router_name`.
    ///
    /// Rows that no longer decode are skipped with a warning.
    pub async fn load_all(&self, router_name: &str) -> Result<Vec<ArmSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT arm_id, snapshot_json
            FROM arm_snapshots
            WHERE router_name = ?
            ORDER BY arm_id
            "#,
        )
        .bind(router_name)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let arm_id: String = row.get("arm_id");
            let json: String = row.get("snapshot_json");
            match serde_json::from_str::<ArmSnapshot>(&json) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(arm_id = %arm_id, error = %e, "Skipping undecodable arm snapshot"),
            }
        }

        info!(router = %router_name, count = snapshots.len(), "Loaded arm snapshots");
        Ok(snapshots)
    }

    /// Delete one arm's snapshot
    pub async fn delete(&self, router_name: &str, arm_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM arm_snapshots WHERE router_name = ? AND arm_id = ?")
            .bind(router_name)
            .bind(arm_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let deleted = result.rows_affected();
        info!(router = %router_name, arm_id = %arm_id, deleted, "Deleted arm snapshot");
        Ok(deleted)
    }

    /// Delete every snapshot saved under `router_name`
    pub async fn clear(&self, router_name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM arm_snapshots WHERE router_name = ?")
            .bind(router_name)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let deleted = result.rows_affected();
        warn!(router = %router_name, deleted, "Cleared arm snapshots");
        Ok(deleted)
    }
}
