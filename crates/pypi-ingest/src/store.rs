//! Status store
//!
//! Durable bookkeeping of package records in the shared `packages` table.
//! Workers on different hosts coordinate only through this table:
//!
//! - **claim**: one conditional `UPDATE ... RETURNING` flips a random READY
//!   row to IN_PROGRESS. `FOR UPDATE SKIP LOCKED` keeps concurrent claimers
//!   off each other's rows, so a row is handed out at most once.
//! - **persist**: version, artifact rows and URL rows are replaced inside one
//!   transaction. [`PackageStore::complete`] also sets COMPLETE as the last
//!   statement of that transaction.
//! - **mark**: a single autocommitted status update.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::db;
use crate::models::{
    DownloadArtifact, PackageRecord, ProcessingStatus, StatusSummary, StoredPackage,
    UnknownStatusCode,
};

/// Status store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatusCode),

    #[error("Package record {0} does not exist")]
    MissingRecord(i64),

    #[error("Cannot reset packages in status '{0}'; only failed or in_progress packages can be reset")]
    InvalidReset(ProcessingStatus),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the pipeline needs from the store
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Atomically move one READY record to IN_PROGRESS and return it
    async fn claim_next(&self) -> StoreResult<Option<PackageRecord>>;

    /// Unconditionally set a record's status, committed before returning
    async fn mark_status(&self, record: &PackageRecord, status: ProcessingStatus)
        -> StoreResult<()>;

    /// Write version and replace artifact and URL rows as one unit
    async fn persist_result(&self, record: &PackageRecord) -> StoreResult<()>;

    /// Persist the result and mark COMPLETE.
    ///
    /// The default runs the two steps in sequence; stores that can should do
    /// both in one transaction.
    async fn complete(&self, record: &PackageRecord) -> StoreResult<()> {
        self.persist_result(record).await?;
        self.mark_status(record, ProcessingStatus::Complete).await
    }

    /// Release the underlying connections
    async fn close(&self);
}

#[async_trait]
impl<T: PackageStore + ?Sized> PackageStore for Arc<T> {
    async fn claim_next(&self) -> StoreResult<Option<PackageRecord>> {
        (**self).claim_next().await
    }

    async fn mark_status(
        &self,
        record: &PackageRecord,
        status: ProcessingStatus,
    ) -> StoreResult<()> {
        (**self).mark_status(record, status).await
    }

    async fn persist_result(&self, record: &PackageRecord) -> StoreResult<()> {
        (**self).persist_result(record).await
    }

    async fn complete(&self, record: &PackageRecord) -> StoreResult<()> {
        (**self).complete(record).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    id: i64,
    name: String,
    version: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PackageRow {
    id: i64,
    name: String,
    version: Option<String>,
    status: i16,
}

/// Postgres-backed [`PackageStore`]
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration. A failure here is fatal for the process.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        Ok(Self::new(db::create_pool(config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert package names in READY status; existing names are left untouched.
    ///
    /// Returns the number of newly inserted packages.
    pub async fn enqueue<S: AsRef<str>>(&self, names: &[S]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for name in names.iter().map(|n| n.as_ref().trim()).filter(|n| !n.is_empty()) {
            inserted += sqlx::query(
                r#"
                INSERT INTO packages (name, status)
                VALUES ($1, $2)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(name)
            .bind(ProcessingStatus::Ready.code())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;

        tracing::info!(requested = names.len(), inserted, "Packages enqueued");
        Ok(inserted)
    }

    /// Move every record in `from` back to READY.
    ///
    /// Only FAILED and IN_PROGRESS may be reset. Resetting IN_PROGRESS while
    /// workers are running hands their records out a second time.
    pub async fn reset(&self, from: ProcessingStatus) -> StoreResult<u64> {
        if !matches!(from, ProcessingStatus::Failed | ProcessingStatus::InProgress) {
            return Err(StoreError::InvalidReset(from));
        }

        let reset = sqlx::query("UPDATE packages SET status = $1 WHERE status = $2")
            .bind(ProcessingStatus::Ready.code())
            .bind(from.code())
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::info!(from = %from, reset, "Packages reset to ready");
        Ok(reset)
    }

    /// Count records per status
    pub async fn summary(&self) -> StoreResult<StatusSummary> {
        let rows: Vec<(i16, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM packages GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut summary = StatusSummary::default();
        for (code, count) in rows {
            summary.add(ProcessingStatus::from_code(code)?, count);
        }
        Ok(summary)
    }

    /// Load a package and its persisted rows by name
    pub async fn find(&self, name: &str) -> StoreResult<Option<StoredPackage>> {
        let row: Option<PackageRow> =
            sqlx::query_as("SELECT id, name, version, status FROM packages WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let artifacts: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, url FROM package_download_urls WHERE for_package = $1 ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let urls: Vec<(String, String)> =
            sqlx::query_as("SELECT name, url FROM package_urls WHERE for_package = $1")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(StoredPackage {
            record_id: row.id,
            identity: row.name,
            version: row.version,
            status: ProcessingStatus::from_code(row.status)?,
            download_artifacts: artifacts
                .into_iter()
                .map(|(artifact_type, url)| DownloadArtifact { artifact_type, url })
                .collect(),
            project_urls: urls.into_iter().collect::<BTreeMap<_, _>>(),
        }))
    }

    async fn write_result(conn: &mut PgConnection, record: &PackageRecord) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE packages SET version = $1 WHERE id = $2")
            .bind(&record.version)
            .bind(record.record_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(StoreError::MissingRecord(record.record_id));
        }

        sqlx::query("DELETE FROM package_download_urls WHERE for_package = $1")
            .bind(record.record_id)
            .execute(&mut *conn)
            .await?;

        for artifact in &record.download_artifacts {
            sqlx::query(
                "INSERT INTO package_download_urls (name, url, for_package) VALUES ($1, $2, $3)",
            )
            .bind(&artifact.artifact_type)
            .bind(&artifact.url)
            .bind(record.record_id)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query("DELETE FROM package_urls WHERE for_package = $1")
            .bind(record.record_id)
            .execute(&mut *conn)
            .await?;

        for (label, url) in &record.project_urls {
            sqlx::query("INSERT INTO package_urls (name, url, for_package) VALUES ($1, $2, $3)")
                .bind(label)
                .bind(url)
                .bind(record.record_id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl PackageStore for PgStatusStore {
    async fn claim_next(&self) -> StoreResult<Option<PackageRecord>> {
        let claimed: Option<ClaimedRow> = sqlx::query_as(
            r#"
            UPDATE packages
            SET status = $1
            WHERE id = (
                SELECT id FROM packages
                WHERE status = $2
                ORDER BY random()
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = $2
            RETURNING id, name, version
            "#,
        )
        .bind(ProcessingStatus::InProgress.code())
        .bind(ProcessingStatus::Ready.code())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.map(|row| PackageRecord::claimed(row.id, row.name, row.version)))
    }

    async fn mark_status(
        &self,
        record: &PackageRecord,
        status: ProcessingStatus,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE packages SET status = $1 WHERE id = $2")
            .bind(status.code())
            .bind(record.record_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            package = %record.identity,
            record_id = record.record_id,
            status = %status,
            "Package status updated"
        );

        Ok(())
    }

    async fn persist_result(&self, record: &PackageRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_result(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn complete(&self, record: &PackageRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_result(&mut *tx, record).await?;

        sqlx::query("UPDATE packages SET status = $1 WHERE id = $2")
            .bind(ProcessingStatus::Complete.code())
            .bind(record.record_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }
}
