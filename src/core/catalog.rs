//! Product catalog loaded from a CSV table
//!
//! Row position is the product index: row `i` of the catalog lines up with
//! row `i` of every embedding matrix.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, RetrievalError};

/// Columns every catalog table must carry
pub const REQUIRED_COLUMNS: [&str; 5] = ["title", "price", "category2_code", "imageurl", "product_code"];

const MISSING: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRecord {
    pub index: usize,
    pub title: String,
    pub price: String,
    pub category: String,
    pub image_url: String,
    pub product_code: String,
}

impl CatalogRecord {
    /// Stand-in for an index with no catalog row
    pub fn placeholder(index: usize) -> Self {
        Self {
            index,
            title: MISSING.to_string(),
            price: MISSING.to_string(),
            category: MISSING.to_string(),
            image_url: String::new(),
            product_code: MISSING.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    title: Option<String>,
    price: Option<String>,
    category2_code: Option<String>,
    imageurl: Option<String>,
    product_code: Option<String>,
}

fn or_missing(value: Option<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => MISSING.to_string(),
    }
}

impl CatalogRow {
    fn into_record(self, index: usize) -> CatalogRecord {
        CatalogRecord {
            index,
            title: or_missing(self.title),
            price: or_missing(self.price),
            category: or_missing(self.category2_code),
            image_url: self.imageurl.map(|u| u.trim().to_string()).unwrap_or_default(),
            product_code: or_missing(self.product_code),
        }
    }
}

/// CSV reader settings shared by every catalog source.
///
/// Header names are trimmed so that validation and row decoding agree.
pub fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::Headers);
    builder
}

/// Read-only, row-indexed product table
#[derive(Debug, Default)]
pub struct CatalogStore {
    records: Vec<CatalogRecord>,
}

impl CatalogStore {
    /// Load the catalog CSV at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RetrievalError::DataUnavailable(format!(
                "catalog not found: {}",
                path.display()
            )));
        }

        let reader = reader_builder()
            .from_path(path)
            .map_err(|e| RetrievalError::data(path.display(), e))?;
        let store = Self::from_reader(reader)
            .map_err(|e| RetrievalError::data(path.display(), e))?;

        tracing::info!(path = %path.display(), products = store.len(), "catalog loaded");
        Ok(store)
    }

    /// Parse a catalog from any CSV reader
    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader
            .headers()
            .map_err(|e| RetrievalError::data("catalog header", e))?
            .clone();

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .collect();
        if !missing.is_empty() {
            return Err(RetrievalError::DataUnavailable(format!(
                "catalog is missing columns: {}",
                missing.join(", ")
            )));
        }

        let mut records = Vec::new();
        for (index, row) in reader.deserialize::<CatalogRow>().enumerate() {
            let row = row.map_err(|e| RetrievalError::data(format!("catalog row {index}"), e))?;
            records.push(row.into_record(index));
        }

        Ok(Self { records })
    }

    pub fn from_records(records: Vec<CatalogRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&CatalogRecord> {
        self.records.get(index).ok_or(RetrievalError::IndexOutOfRange {
            index,
            len: self.records.len(),
        })
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }
}
