use anyhow::Result;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::HarvestError;
use crate::normalization::table::{data_column, Table, BRAND_COLUMN};

/// Rows ready for the staging store: `BrandID, F0..F(n-1), F(n)` where `F(n)` is provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBatch {
    pub brand_id: i64,
    /// Text columns after `BrandID`, provenance last.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StagedBatch {
    /// Appends the provenance column to every row of `table`.
    pub fn build(brand_id: i64, table: Table, scan_url: &str) -> Result<Self, HarvestError> {
        let width = table.width();
        let mut columns = table.columns().to_vec();
        columns.push(data_column(width));
        let rows: Vec<Vec<String>> = table
            .into_rows()
            .into_iter()
            .map(|mut row| {
                row.push(scan_url.to_string());
                row
            })
            .collect();
        let batch = Self {
            brand_id,
            columns,
            rows,
        };
        batch.check_rectangular()?;
        Ok(batch)
    }

    pub fn check_rectangular(&self) -> Result<(), HarvestError> {
        let expected = self.columns.len();
        match self.rows.iter().position(|r| r.len() != expected) {
            Some(idx) => Err(HarvestError::StagingLoad(format!(
                "staged row {} has {} fields, expected {}",
                idx + 1,
                self.rows[idx].len(),
                expected
            ))),
            None => Ok(()),
        }
    }

    /// Data columns, excluding the trailing provenance column.
    pub fn data_width(&self) -> usize {
        self.columns.len().saturating_sub(1)
    }

    pub fn provenance_column(&self) -> Option<&str> {
        self.columns.last().map(String::as_str)
    }

    /// All column names including the leading brand column.
    pub fn header(&self) -> Vec<&str> {
        std::iter::once(BRAND_COLUMN)
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }
}

/// Holding area for normalized rows awaiting transformation.
#[async_trait::async_trait]
pub trait StagingStore: Send + Sync {
    /// Delete every staged row for `brand_id`; returns how many went.
    async fn clear(&self, brand_id: i64) -> Result<u64>;
    /// Append rows; never replaces rows already staged for the brand.
    async fn append(&self, batch: &StagedBatch) -> Result<u64>;
    /// Distinct brands with rows currently staged.
    async fn staged_brands(&self) -> Result<Vec<i64>>;
}

/// Clears and loads staged rows through a [`StagingStore`].
#[derive(Clone)]
pub struct StagingLoader {
    store: Arc<dyn StagingStore>,
}

impl StagingLoader {
    pub fn new(store: Arc<dyn StagingStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, brand_id: i64) -> Result<u64, HarvestError> {
        let removed = self
            .store
            .clear(brand_id)
            .await
            .map_err(|e| HarvestError::staging(format!("{e:#}")))?;
        info!(brand_id, removed, "cleared staging");
        Ok(removed)
    }

    /// Prefix the brand, append `scan_url` as provenance, and append to the store.
    #[instrument(skip(self, table), fields(rows = table.len(), width = table.width()))]
    pub async fn stage(
        &self,
        brand_id: i64,
        table: Table,
        scan_url: &str,
    ) -> Result<StagedBatch, HarvestError> {
        let batch = StagedBatch::build(brand_id, table, scan_url)?;
        let inserted = self
            .store
            .append(&batch)
            .await
            .map_err(|e| HarvestError::staging(format!("{e:#}")))?;
        info!(brand_id, inserted, columns = batch.columns.len(), "staged rows");
        Ok(batch)
    }

    pub async fn staged_brands(&self) -> Result<Vec<i64>, HarvestError> {
        self.store
            .staged_brands()
            .await
            .map_err(|e| HarvestError::StoreQuery(format!("{e:#}")))
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Staging double that keeps rows in memory and counts calls.
    #[derive(Default)]
    pub struct MemoryStaging {
        pub rows: Mutex<Vec<(i64, Vec<String>)>>,
        pub appends: Mutex<usize>,
        pub clears: Mutex<Vec<i64>>,
        pub fail_append: bool,
    }

    impl MemoryStaging {
        pub fn rows_for(&self, brand_id: i64) -> Vec<Vec<String>> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(b, _)| *b == brand_id)
                .map(|(_, r)| r.clone())
                .collect()
        }

        pub fn append_calls(&self) -> usize {
            *self.appends.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl StagingStore for MemoryStaging {
        async fn clear(&self, brand_id: i64) -> Result<u64> {
            self.clears.lock().unwrap().push(brand_id);
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|(b, _)| *b != brand_id);
            Ok((before - rows.len()) as u64)
        }

        async fn append(&self, batch: &StagedBatch) -> Result<u64> {
            *self.appends.lock().unwrap() += 1;
            if self.fail_append {
                anyhow::bail!("relation \"retail_load_initial\" is read-only");
            }
            let mut rows = self.rows.lock().unwrap();
            for row in &batch.rows {
                let mut full = vec![batch.brand_id.to_string()];
                full.extend(row.iter().cloned());
                rows.push((batch.brand_id, full));
            }
            Ok(batch.rows.len() as u64)
        }

        async fn staged_brands(&self) -> Result<Vec<i64>> {
            let brands: BTreeSet<i64> = self.rows.lock().unwrap().iter().map(|(b, _)| *b).collect();
            Ok(brands.into_iter().collect())
        }
    }
}
