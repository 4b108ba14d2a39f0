//! Execution Modules
//!
//! - Embedded SQL engine session
//! - Query executor (repair, run, contain failures)
//! - Tagged query results

pub mod engine;
pub mod executor;
pub mod result;

pub use engine::{AnalyticalEngine, PolarsSqlSession};
pub use executor::{execute_sql_on_df, QueryExecutor};
pub use result::{FailureKind, QueryFailure, QueryOutcome, ResultTable};
