// src/fetch/mod.rs
//! Reading cell ranges from the upstream spreadsheet.

pub mod sheets;

use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        PoisonError, RwLock,
    },
};

use crate::error::{Error, Result};

pub use sheets::SheetsClient;

/// Anything that can answer `"Sheet!A:Z"` with a grid of cells.
///
/// An empty range is `Ok(vec![])`, never an error.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<Value>>>;
}

/// In-memory source with per-range failure injection.
#[derive(Debug, Default)]
pub struct StaticSource {
    ranges: RwLock<HashMap<String, Vec<Vec<Value>>>>,
    failing: RwLock<HashSet<String>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(self, range: &str, values: Vec<Vec<Value>>) -> Self {
        self.set_range(range, values);
        self
    }

    pub fn set_range(&self, range: &str, values: Vec<Vec<Value>>) {
        self.ranges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(range.to_string(), values);
    }

    /// Make every later read of `range` fail.
    pub fn fail_range(&self, range: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(range.to_string());
    }

    pub fn heal(&self) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of `get_range` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataSource for StaticSource {
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<Value>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(range)
        {
            return Err(Error::Upstream(format!("injected failure for {}", range)));
        }
        Ok(self
            .ranges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(range)
            .cloned()
            .unwrap_or_default())
    }
}
