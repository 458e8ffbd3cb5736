use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::MetricsStore;
use crate::error::PersistError;
use crate::model::Metrics;

/// Seller metrics kept in a local SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    /// Open (creating if needed) the database and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Last time the metrics of a seller were written.
    pub async fn updated_at(&self, store_id: &str, seller_id: &str) -> Result<Option<DateTime<Utc>>> {
        let at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT updated_at FROM seller_metrics WHERE store_id = ? AND seller_id = ?",
        )
        .bind(store_id)
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(at)
    }
}

pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    if !normalized.starts_with("sqlite::memory") {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
    }
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Expand a leading `~/`, make sure the parent directory exists and ask
/// sqlx to create the file. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{expanded}?{query}")
}

fn db_error(err: sqlx::Error) -> PersistError {
    PersistError::new(format!("database error: {err}"))
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    #[instrument(skip(self, metrics))]
    async fn save(
        &self,
        store_id: &str,
        seller_id: &str,
        metrics: &Metrics,
    ) -> Result<(), PersistError> {
        sqlx::query(
            "INSERT INTO seller_metrics \
             (store_id, seller_id, vendas, pa, ticket_medio, corridinha_diaria, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(store_id, seller_id) DO UPDATE SET \
               vendas = excluded.vendas, \
               pa = excluded.pa, \
               ticket_medio = excluded.ticket_medio, \
               corridinha_diaria = excluded.corridinha_diaria, \
               updated_at = excluded.updated_at",
        )
        .bind(store_id)
        .bind(seller_id)
        .bind(metrics.vendas)
        .bind(metrics.pa)
        .bind(metrics.ticket_medio)
        .bind(metrics.corridinha_diaria)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(
        &self,
        store_id: &str,
        seller_id: &str,
    ) -> Result<Option<Metrics>, PersistError> {
        let row = sqlx::query(
            "SELECT vendas, pa, ticket_medio, corridinha_diaria FROM seller_metrics \
             WHERE store_id = ? AND seller_id = ?",
        )
        .bind(store_id)
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| Metrics {
            vendas: row.get("vendas"),
            pa: row.get("pa"),
            ticket_medio: row.get("ticket_medio"),
            corridinha_diaria: row.get("corridinha_diaria"),
        }))
    }
}
