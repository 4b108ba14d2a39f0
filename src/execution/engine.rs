//! Analytical Engine - embedded SQL over in-memory frames
//!
//! A session is a short-lived, isolated SQL context. Frames are registered
//! by name as lazy views (the column buffers are shared, not copied) and
//! statements execute against them in-process. Dropping the session releases
//! every registration.

use crate::error::{Result, SmartQueryError};
use polars::prelude::*;
use polars::sql::SQLContext;
use tracing::debug;

/// Minimal contract every embedded engine session must implement
pub trait AnalyticalEngine {
    /// Engine name (e.g., "polars-sql")
    fn name(&self) -> &'static str;

    /// Expose `frame` as a queryable relation called `name`
    fn register(&mut self, name: &str, frame: DataFrame);

    /// Execute one SQL statement and materialize the result
    fn execute(&mut self, sql: &str) -> Result<DataFrame>;
}

/// Polars SQL session; one per request
pub struct PolarsSqlSession {
    ctx: SQLContext,
    registered: Vec<String>,
}

impl PolarsSqlSession {
    pub fn new() -> Self {
        Self {
            ctx: SQLContext::new(),
            registered: Vec::new(),
        }
    }

    pub fn registered(&self) -> &[String] {
        &self.registered
    }
}

impl Default for PolarsSqlSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticalEngine for PolarsSqlSession {
    fn name(&self) -> &'static str {
        "polars-sql"
    }

    fn register(&mut self, name: &str, frame: DataFrame) {
        debug!("registering relation '{}' ({} rows)", name, frame.height());
        self.ctx.register(name, frame.lazy());
        if !self.registered.iter().any(|n| n == name) {
            self.registered.push(name.to_string());
        }
    }

    fn execute(&mut self, sql: &str) -> Result<DataFrame> {
        let lazy = self
            .ctx
            .execute(sql)
            .map_err(|e| SmartQueryError::Execution(format!("Failed to plan query: {}", e)))?;
        lazy.collect()
            .map_err(|e| SmartQueryError::Execution(format!("Failed to execute query: {}", e)))
    }
}

impl Drop for PolarsSqlSession {
    fn drop(&mut self) {
        for name in self.registered.drain(..) {
            self.ctx.unregister(&name);
        }
    }
}
