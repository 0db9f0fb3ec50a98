//! PostgreSQL implementation of conductor's `Memory` trait.
//!
//! This crate provides a production-ready PostgreSQL backing store for
//! [`conductor_core::Memory`]: one row per subject for the persisted
//! record, and a separate table for the per-subject lock so acquiring and
//! releasing it doesn't depend on holding a single session open across
//! calls (unlike `pg_advisory_lock`, which requires that).
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE conductor_locks (
//!     subject TEXT PRIMARY KEY,
//!     locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE conductor_records (
//!     subject TEXT PRIMARY KEY,
//!     parent_subject TEXT,
//!     status TEXT NOT NULL,
//!     record JSONB NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE INDEX idx_conductor_records_parent ON conductor_records (parent_subject)
//!     WHERE parent_subject IS NOT NULL;
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use conductor_persistence_postgres::PgMemory;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/conductor").await?;
//! let memory = PgMemory::new(pool);
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use conductor_core::{MachineMemoryRecord, Memory};
use sqlx::{PgPool, Row};

/// PostgreSQL-backed `Memory` implementation.
#[derive(Clone)]
pub struct PgMemory {
    pool: PgPool,
}

impl PgMemory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the schema above against `pool`, for demos and integration
    /// tests that don't manage migrations out-of-band.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conductor_locks (
                subject TEXT PRIMARY KEY,
                locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .context("creating conductor_locks")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conductor_records (
                subject TEXT PRIMARY KEY,
                parent_subject TEXT,
                status TEXT NOT NULL,
                record JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(pool)
        .await
        .context("creating conductor_records")?;

        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Memory for PgMemory {
    /// Attempt to claim the subject's lock row. `Ok(true)` if this call
    /// inserted it, `Ok(false)` if another holder already has it.
    async fn lock(&self, subject: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO conductor_locks (subject)
            VALUES ($1)
            ON CONFLICT (subject) DO NOTHING
            RETURNING subject
            "#,
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn unlock(&self, subject: &str) -> Result<()> {
        sqlx::query("DELETE FROM conductor_locks WHERE subject = $1")
            .bind(subject)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read(&self, subject: &str) -> Result<Option<MachineMemoryRecord>> {
        let row = sqlx::query("SELECT record FROM conductor_records WHERE subject = $1")
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = row.get("record");
        let record: MachineMemoryRecord =
            serde_json::from_value(value).context("decoding conductor_records.record")?;
        Ok(Some(record))
    }

    async fn write(
        &self,
        subject: &str,
        record: &MachineMemoryRecord,
        _prev: Option<&MachineMemoryRecord>,
    ) -> Result<()> {
        let value = serde_json::to_value(record).context("encoding machine memory record")?;
        sqlx::query(
            r#"
            INSERT INTO conductor_records (subject, parent_subject, status, record, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (subject) DO UPDATE
            SET parent_subject = EXCLUDED.parent_subject,
                status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = NOW()
            "#,
        )
        .bind(subject)
        .bind(&record.parent_subject)
        .bind(&record.status)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Convenience constructor for wrapping a `PgMemory` in the `Arc<dyn
/// Memory>` `OrchestratorBuilder::with_memory` expects.
pub fn shared(pool: PgPool) -> Arc<dyn Memory> {
    Arc::new(PgMemory::new(pool))
}
