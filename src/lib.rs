pub mod chat;
pub mod config;
pub mod error;
pub mod execution;
pub mod fuzzy_matcher;
pub mod ingestion;
pub mod llm;
pub mod repair;
pub mod schema;
pub mod smart_query;
pub mod synthesizer;

pub use config::SmartQueryConfig;
pub use error::{Result, SmartQueryError};
pub use execution::{QueryExecutor, QueryOutcome, ResultTable};
pub use schema::SchemaDescriptor;
pub use smart_query::{QueryResponse, QueryState, SmartQuery};
