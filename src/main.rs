use smart_query::chat::{preset_questions, AnalystChat};
use smart_query::ingestion::{clean_frame, read_and_validate_file};
use smart_query::llm::GeneratorPool;
use smart_query::{SchemaDescriptor, SmartQuery, SmartQueryConfig};

use anyhow::Result;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smart-query")]
#[command(about = "Ask questions of a CSV or XLSX dataset in plain language")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Worksheet to load from an XLSX file (default: the first sheet)
    #[arg(long, global = true)]
    sheet: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and clean a dataset, then print its schema descriptor
    Schema {
        /// CSV or XLSX file to load
        file: PathBuf,
    },
    /// Turn a question into SQL and run it against the dataset
    Ask {
        /// CSV or XLSX file to load
        file: PathBuf,

        /// The question in natural language
        question: String,

        /// Maximum rows to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// One conversational turn about the dataset
    Chat {
        /// CSV or XLSX file to load
        file: PathBuf,

        /// Question for the analyst (omit to list starter questions)
        question: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let args = Args::parse();
    let config = SmartQueryConfig::from_env()?;
    if config.llm.is_dummy() {
        warn!("OPENAI_API_KEY is not set; generation runs offline and returns no rows");
    }

    let sheet = args.sheet.as_deref();
    match args.command {
        Commands::Schema { file } => {
            let (_, schema) = load(&file, sheet)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Ask { file, question, limit } => {
            let (df, schema) = load(&file, sheet)?;
            let pipeline = SmartQuery::from_config(&config);
            let response = pipeline.ask(&question, &df, &schema).await;

            if let Some(sql) = &response.repaired_sql {
                println!("SQL: {}", sql);
            }
            for sub in &response.substitutions {
                println!("  corrected '{}' -> '{}'", sub.from, sub.to);
            }
            if let Some(failure) = response.outcome.failure() {
                warn!("query failed: {}", failure);
            }
            match (response.display_message(), response.outcome.table()) {
                (None, Some(table)) => print_table(table.frame(), limit),
                (message, _) => println!("{}", message.unwrap_or_default()),
            }
        }
        Commands::Chat { file, question } => {
            let (_, schema) = load(&file, sheet)?;
            let Some(question) = question else {
                println!("Try one of:");
                for q in preset_questions() {
                    println!("  - {}", q);
                }
                return Ok(());
            };

            let pool = Arc::new(GeneratorPool::from_config(&config.llm));
            let mut chat = AnalystChat::new(pool, &schema);
            let answer = chat.ask(&question).await?;
            println!("{}", answer.text);
        }
    }

    Ok(())
}

fn load(file: &Path, sheet: Option<&str>) -> Result<(DataFrame, SchemaDescriptor)> {
    let raw = read_and_validate_file(file, sheet)?;
    let (df, report) = clean_frame(raw)?;
    info!(
        "cleaned: dropped {:?}, removed {} duplicates",
        report.dropped_columns, report.duplicates_removed
    );
    let schema = SchemaDescriptor::from_frame(&df)?;
    Ok((df, schema))
}

fn print_table(df: &DataFrame, limit: usize) {
    println!("{}", df.get_column_names().iter().join(" | "));
    for row in 0..df.height().min(limit) {
        let cells = df
            .get_columns()
            .iter()
            .map(|s| match s.get(row) {
                Ok(AnyValue::String(v)) => v.to_string(),
                Ok(v) => v.to_string(),
                Err(_) => String::new(),
            })
            .join(" | ");
        println!("{}", cells);
    }
    if df.height() > limit {
        println!("... {} more rows", df.height() - limit);
    }
}
