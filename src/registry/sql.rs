//! SQL registry
//!
//! SQLite and Postgres through the sqlx `Any` driver. Placeholders are written
//! `$N` and used once each, in order, which both backends accept.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use tracing::{debug, info, warn};

use super::{member_ids, DbConfig, DbKind, LoadedBatch, Registry, RegistryError};
use crate::models::{DbId, Job, RunRecord, TestCase};

/// Registry backed by a relational database
#[derive(Clone)]
pub struct SqlRegistry {
    pool: AnyPool,
    kind: DbKind,
}

impl SqlRegistry {
    /// Open a pool for the configured database
    pub async fn connect(config: &DbConfig) -> Result<Self, RegistryError> {
        install_default_drivers();

        let kind = config.kind;
        let schema = config.pg_schema.clone();
        if kind == DbKind::Postgres && !is_identifier(&schema) {
            return Err(RegistryError::InvalidConfig(format!(
                "invalid postgres schema name '{schema}'"
            )));
        }

        let pool = AnyPoolOptions::new()
            .max_connections(4)
            .after_connect(move |conn, _meta| {
                let schema = schema.clone();
                Box::pin(async move {
                    let stmt = match kind {
                        DbKind::Postgres => format!("SET search_path TO {schema}"),
                        DbKind::Sqlite => "PRAGMA foreign_keys = ON".to_string(),
                    };
                    sqlx::query(&stmt).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        if kind == DbKind::Sqlite {
            // Lets remote tasks on the same host read while another one writes
            if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await {
                warn!("Could not enable WAL journal, concurrent tasks may block: {}", e);
            }
        }

        debug!("Connected to {} registry", kind);
        Ok(Self { pool, kind })
    }

    /// Create tables if they do not exist yet (`--db-init`)
    pub async fn init_schema(&self) -> Result<(), RegistryError> {
        info!("Creating {} registry schema", self.kind);

        let pk = match self.kind {
            DbKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            DbKind::Postgres => "BIGSERIAL PRIMARY KEY",
        };

        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS test_cases (
                    id {pk},
                    path TEXT NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS test_jobs (
                    id {pk},
                    title TEXT NOT NULL,
                    note TEXT NOT NULL,
                    interp TEXT NOT NULL,
                    interp_path TEXT NOT NULL,
                    interp_version TEXT,
                    tests_version TEXT,
                    batch_size BIGINT,
                    condor_cluster BIGINT,
                    condor_scheduler TEXT,
                    create_time TEXT NOT NULL,
                    username TEXT NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS test_batches (
                    id {pk},
                    job_id BIGINT NOT NULL REFERENCES test_jobs(id),
                    batch_idx BIGINT NOT NULL,
                    condor_proc BIGINT,
                    system TEXT,
                    start_time TEXT,
                    UNIQUE (job_id, batch_idx)
                )"
            ),
            "CREATE TABLE IF NOT EXISTS test_batch_members (
                batch_id BIGINT NOT NULL REFERENCES test_batches(id),
                test_id BIGINT NOT NULL REFERENCES test_cases(id),
                position BIGINT NOT NULL,
                PRIMARY KEY (batch_id, test_id)
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS test_runs (
                    id {pk},
                    test_id BIGINT NOT NULL REFERENCES test_cases(id),
                    batch_id BIGINT NOT NULL REFERENCES test_batches(id),
                    result TEXT NOT NULL,
                    exit_code BIGINT,
                    stdout TEXT NOT NULL,
                    stderr TEXT NOT NULL,
                    duration_ms BIGINT NOT NULL,
                    start_time TEXT NOT NULL
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_test_runs_batch ON test_runs(batch_id)".to_string(),
        ];

        let mut tx = self.pool.begin().await?;
        for stmt in &statements {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Registry for SqlRegistry {
    async fn insert_test_cases(&self, locators: &[String]) -> Result<Vec<DbId>, RegistryError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(locators.len());

        for locator in locators {
            let id: i64 =
                sqlx::query_scalar("INSERT INTO test_cases (path) VALUES ($1) RETURNING id")
                    .bind(locator.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn create_job_with_batches(&self, job: &mut Job) -> Result<DbId, RegistryError> {
        let members = member_ids(job)?;
        let mut tx = self.pool.begin().await?;

        let job_id: i64 = sqlx::query_scalar(
            "INSERT INTO test_jobs \
                (title, note, interp, interp_path, interp_version, tests_version, \
                 batch_size, create_time, username) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id",
        )
        .bind(job.title.as_str())
        .bind(job.note.as_str())
        .bind(job.interpreter.kind.as_str())
        .bind(job.interpreter.program())
        .bind(job.interpreter.version.clone())
        .bind(job.tests_version.clone())
        .bind(job.batch_size.map(|n| n.get() as i64))
        .bind(job.created_at.to_rfc3339())
        .bind(job.user.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut batch_ids = Vec::with_capacity(job.batches.len());
        for (batch, test_ids) in job.batches.iter().zip(&members) {
            let batch_id: i64 = sqlx::query_scalar(
                "INSERT INTO test_batches (job_id, batch_idx) VALUES ($1, $2) RETURNING id",
            )
            .bind(job_id)
            .bind(i64::from(batch.index))
            .fetch_one(&mut *tx)
            .await?;

            for (position, test_id) in test_ids.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO test_batch_members (batch_id, test_id, position) \
                     VALUES ($1, $2, $3)",
                )
                .bind(batch_id)
                .bind(*test_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
            }
            batch_ids.push(batch_id);
        }

        tx.commit().await?;

        // Identities only become visible on the model once the commit succeeded
        job.id = Some(job_id);
        for (batch, id) in job.batches.iter_mut().zip(batch_ids) {
            batch.id = Some(id);
        }

        debug!("Persisted job {} with {} batches", job_id, job.batches.len());
        Ok(job_id)
    }

    async fn load_batch(
        &self,
        job_id: DbId,
        batch_index: u32,
    ) -> Result<Option<LoadedBatch>, RegistryError> {
        let batch_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM test_batches WHERE job_id = $1 AND batch_idx = $2")
                .bind(job_id)
                .bind(i64::from(batch_index))
                .fetch_optional(&self.pool)
                .await?;

        let Some(batch_id) = batch_id else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT t.id AS id, t.path AS path \
             FROM test_batch_members m \
             JOIN test_cases t ON t.id = m.test_id \
             WHERE m.batch_id = $1 \
             ORDER BY m.position",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let test_cases = rows
            .iter()
            .map(|row| {
                Ok(TestCase::persisted(
                    row.try_get::<i64, _>("id")?,
                    row.try_get::<String, _>("path")?,
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(LoadedBatch {
            batch_id,
            test_cases,
        }))
    }

    async fn update_job(&self, job: &Job) -> Result<(), RegistryError> {
        let job_id = job
            .id
            .ok_or_else(|| RegistryError::NotPersisted(format!("job '{}'", job.title)))?;

        sqlx::query(
            "UPDATE test_jobs SET condor_cluster = $1, condor_scheduler = $2, \
                interp_version = $3, tests_version = $4 \
             WHERE id = $5",
        )
        .bind(job.cluster.map(|c| c.0 as i64))
        .bind(job.scheduler_host.clone())
        .bind(job.interpreter.version.clone())
        .bind(job.tests_version.clone())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_batch_started(
        &self,
        batch_id: DbId,
        process: u32,
        host: &str,
    ) -> Result<(), RegistryError> {
        sqlx::query(
            "UPDATE test_batches SET condor_proc = $1, system = $2, start_time = $3 \
             WHERE id = $4",
        )
        .bind(i64::from(process))
        .bind(host)
        .bind(Utc::now().to_rfc3339())
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_run(&self, batch_id: DbId, run: &RunRecord) -> Result<DbId, RegistryError> {
        let test_id = run
            .test_id()
            .ok_or_else(|| RegistryError::NotPersisted(format!("test case {}", run.test_case)))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO test_runs \
                (test_id, batch_id, result, exit_code, stdout, stderr, duration_ms, start_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(test_id)
        .bind(batch_id)
        .bind(run.status.as_str())
        .bind(run.exit_code.map(i64::from))
        .bind(run.stdout.as_str())
        .bind(run.stderr.as_str())
        .bind(run.duration_ms as i64)
        .bind(run.started_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
