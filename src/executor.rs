//! Query execution contract.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn record_count(&self) -> usize {
        self.rows.len()
    }

    /// Writes the rows as CSV with a header line.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer
            .write_record(&self.columns)
            .map_err(|e| crate::error::EngineError::Io(e.into()))?;
        for row in &self.rows {
            let record: Vec<String> = row
                .iter()
                .map(|v| match v {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            csv_writer
                .write_record(&record)
                .map_err(|e| crate::error::EngineError::Io(e.into()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs a read-only query, returning at most `row_limit` rows.
    async fn execute(&self, sql: &str, row_limit: usize) -> Result<QueryOutput>;
}
