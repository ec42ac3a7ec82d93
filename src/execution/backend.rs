//! Execution Backend Trait - Contract between the engine and a database
//!
//! A backend hands out one long-lived handle per execution tier. Handles run
//! SQL and return rows; they are shared, so each serializes its own calls.

use crate::compiler::ExecutionVariant;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rows returned by a handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Row values, one `Vec` per row in column order
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let objects: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect();
        serde_json::Value::Array(objects)
    }
}

/// A tier-configured connection
#[async_trait]
pub trait ExecutionHandle: Send + Sync {
    async fn run(&self, sql: &str) -> Result<QueryRows>;
}

/// Database behind the engine
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name (e.g., "sqlite")
    fn name(&self) -> &'static str;

    /// Handle for the variant's tier, created on first use and reused after
    async fn get_handle(&self, variant: &ExecutionVariant) -> Result<Arc<dyn ExecutionHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_to_json() {
        let rows = QueryRows {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec![json!(1), json!("a")], vec![json!(2), json!(null)]],
        };
        assert_eq!(rows.row_count(), 2);
        assert_eq!(
            rows.to_json(),
            json!([{"id": 1, "name": "a"}, {"id": 2, "name": null}])
        );
    }
}
