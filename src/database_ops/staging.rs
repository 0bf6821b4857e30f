use anyhow::{bail, Context, Result};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, instrument};

use super::{quote_ident, Db};
use crate::config::is_identifier;
use crate::normalization::BRAND_COLUMN;
use crate::staging::{StagedBatch, StagingStore};

/// Postgres bind-parameter ceiling per statement.
const MAX_BINDS: usize = 65_535;

/// Rows per INSERT so a chunk stays under the bind limit.
///
/// `columns` excludes the brand column, which is bound once per row as well.
pub fn rows_per_chunk(columns: usize) -> Result<usize> {
    let per_row = columns + 1;
    if per_row > MAX_BINDS {
        bail!("export has {columns} columns; one row needs {per_row} binds, over the {MAX_BINDS} limit");
    }
    Ok(MAX_BINDS / per_row)
}

/// Staging table with a `"BrandID"` column and text columns `"F0".."Fn"` added on demand.
#[derive(Clone)]
pub struct PgStagingStore {
    db: Db,
    table: String,
}

impl PgStagingStore {
    pub fn new(db: Db, table: &str) -> Self {
        Self {
            db,
            table: quote_ident(table),
        }
    }
}

#[async_trait::async_trait]
impl StagingStore for PgStagingStore {
    #[instrument(skip(self))]
    async fn clear(&self, brand_id: i64) -> Result<u64> {
        let mut conn = self.db.pool.acquire().await?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            self.table,
            quote_ident(BRAND_COLUMN)
        );
        let done = sqlx::query(&sql)
            .bind(brand_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("clearing staging for brand {brand_id}"))?;
        Ok(done.rows_affected())
    }

    #[instrument(skip(self, batch), fields(brand_id = batch.brand_id, rows = batch.rows.len()))]
    async fn append(&self, batch: &StagedBatch) -> Result<u64> {
        if batch.rows.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = batch.columns.iter().find(|c| !is_identifier(c)) {
            bail!("refusing to stage column {bad:?}");
        }
        let chunk_rows = rows_per_chunk(batch.columns.len())?;

        let mut tx = self.db.pool.begin().await?;
        // The width varies per export; grow the table to fit before inserting.
        for col in &batch.columns {
            let ddl = format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TEXT",
                self.table,
                quote_ident(col)
            );
            sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&ddl)).await?;
        }

        let column_list = std::iter::once(BRAND_COLUMN)
            .chain(batch.columns.iter().map(String::as_str))
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        let mut inserted = 0u64;
        for chunk in batch.rows.chunks(chunk_rows) {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({column_list}) ", self.table));
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(batch.brand_id);
                for value in row {
                    b.push_bind(value.as_str());
                }
            });
            let done = qb.build().persistent(false).execute(&mut *tx).await?;
            inserted += done.rows_affected();
            debug!(chunk = chunk.len(), "inserted staging chunk");
        }
        tx.commit()
            .await
            .with_context(|| format!("committing staging rows for brand {}", batch.brand_id))?;
        Ok(inserted)
    }

    async fn staged_brands(&self) -> Result<Vec<i64>> {
        let mut conn = self.db.pool.acquire().await?;
        let brand = quote_ident(BRAND_COLUMN);
        let sql = format!(
            "SELECT DISTINCT {brand} AS brand_id FROM {} WHERE {brand} IS NOT NULL ORDER BY 1",
            self.table
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .context("listing staged brands")?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("brand_id").map_err(anyhow::Error::from))
            .collect()
    }
}
