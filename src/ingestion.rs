//! Ingestion - upload validation and cleaning
//!
//! Loads an uploaded CSV or XLSX workbook into a frame and applies the fixed
//! cleaning recipe: sparse columns are dropped, gaps are imputed, duplicate
//! rows removed, date-like text becomes datetimes, yes/no and true/false text
//! flags become 1/0, and column names are normalized to lower snake case. The
//! cleaned frame is what the schema descriptor and the query pipeline see.

use crate::error::{Result, SmartQueryError};
use calamine::{open_workbook_auto, Data, DataType as CellType, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Columns missing more than this share of values are dropped
pub const MAX_MISSING_RATIO: f64 = 0.5;

/// Text columns where more than this share of rows parse as dates become datetimes
pub const MIN_DATE_RATIO: f64 = 0.8;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// What `clean_frame` changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub dropped_columns: Vec<String>,
    pub median_imputed: Vec<String>,
    pub mode_imputed: Vec<String>,
    pub duplicates_removed: usize,
    pub date_columns: Vec<String>,
    pub flag_columns: Vec<String>,
    pub renamed_columns: Vec<(String, String)>,
}

/// Read an uploaded file.
///
/// CSV and XLSX are accepted (extension checked case-insensitively). For a
/// workbook, `sheet` names the worksheet to load; the first one is used when
/// it is `None`. An empty table is rejected.
pub fn read_and_validate_file(path: impl AsRef<Path>, sheet: Option<&str>) -> Result<DataFrame> {
    let path = path.as_ref();
    info!("Reading uploaded file {}", path.display());

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    let df = match extension.as_deref() {
        Some("csv") => read_csv(path)?,
        Some("xlsx") => read_xlsx(path, sheet)?,
        _ => {
            return Err(SmartQueryError::Ingestion(format!(
                "Unsupported file format for {}. Please upload a CSV or XLSX file.",
                path.display()
            )))
        }
    };

    if df.height() == 0 || df.width() == 0 {
        return Err(SmartQueryError::Ingestion(
            "The file is empty. Please upload a valid dataset.".to_string(),
        ));
    }

    info!("Loaded {} rows x {} columns", df.height(), df.width());
    Ok(df)
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    LazyCsvReader::new(path)
        .with_has_header(true)
        .with_try_parse_dates(true)
        .with_infer_schema_length(Some(1000))
        .finish()
        .map_err(|e| SmartQueryError::Ingestion(format!("Failed to read CSV: {}", e)))?
        .collect()
        .map_err(|e| SmartQueryError::Ingestion(format!("Failed to read CSV: {}", e)))
}

fn read_xlsx(path: &Path, sheet: Option<&str>) -> Result<DataFrame> {
    let excel_err = |e: calamine::Error| SmartQueryError::Ingestion(format!("Failed to read XLSX: {}", e));

    let mut workbook = open_workbook_auto(path).map_err(excel_err)?;
    let range = match sheet {
        Some(name) => workbook.worksheet_range(name).map_err(excel_err)?,
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SmartQueryError::Ingestion("Workbook has no worksheets".to_string()))?
            .map_err(excel_err)?,
    };
    debug!("worksheet {:?} spans {:?}", sheet, range.get_size());

    frame_from_range(&range)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SheetColumn {
    Int,
    Float,
    Bool,
    Datetime,
    Text,
}

/// Build a frame from a worksheet range; the first row holds the headers.
pub fn frame_from_range(range: &Range<Data>) -> Result<DataFrame> {
    static EMPTY: Data = Data::Empty;

    let rows: Vec<&[Data]> = range.rows().collect();
    let Some((header, body)) = rows.split_first() else {
        return Ok(DataFrame::empty());
    };

    let mut columns = Vec::with_capacity(header.len());
    for (idx, title) in header.iter().enumerate() {
        let name = match title {
            Data::Empty => format!("column_{}", idx + 1),
            other => other.to_string().trim().to_string(),
        };
        let cells: Vec<&Data> = body.iter().map(|row| row.get(idx).unwrap_or(&EMPTY)).collect();
        columns.push(sheet_series(&name, &cells)?);
    }

    Ok(DataFrame::new(columns)?)
}

fn sheet_column_kind(cells: &[&Data]) -> SheetColumn {
    let mut kind: Option<SheetColumn> = None;
    for cell in cells {
        let cell_kind = match cell {
            Data::Empty => continue,
            Data::Int(_) => SheetColumn::Int,
            Data::Float(f) if f.fract() == 0.0 => SheetColumn::Int,
            Data::Float(_) => SheetColumn::Float,
            Data::Bool(_) => SheetColumn::Bool,
            Data::DateTime(_) => SheetColumn::Datetime,
            _ => return SheetColumn::Text,
        };
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(SheetColumn::Int), SheetColumn::Float) | (Some(SheetColumn::Float), SheetColumn::Int) => {
                SheetColumn::Float
            }
            _ => return SheetColumn::Text,
        });
    }
    kind.unwrap_or(SheetColumn::Text)
}

fn sheet_series(name: &str, cells: &[&Data]) -> Result<Series> {
    let series = match sheet_column_kind(cells) {
        SheetColumn::Int => {
            let v: Vec<Option<i64>> = cells.iter().map(|c| c.as_i64()).collect();
            Series::new(name, v)
        }
        SheetColumn::Float => {
            let v: Vec<Option<f64>> = cells.iter().map(|c| c.as_f64()).collect();
            Series::new(name, v)
        }
        SheetColumn::Bool => {
            let v: Vec<Option<bool>> = cells.iter().map(|c| c.get_bool()).collect();
            Series::new(name, v)
        }
        SheetColumn::Datetime => {
            let v: Vec<Option<i64>> = cells
                .iter()
                .map(|c| c.as_datetime().map(|dt| dt.and_utc().timestamp_millis()))
                .collect();
            Series::new(name, v).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        }
        SheetColumn::Text => {
            let v: Vec<Option<String>> = cells
                .iter()
                .map(|c| match c {
                    Data::Empty => None,
                    other => Some(other.to_string()),
                })
                .collect();
            Series::new(name, v)
        }
    };
    Ok(series)
}

/// Parse a date or datetime written in one of the common layouts.
pub fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Lower-case, trim, and turn spaces and hyphens into underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Apply the cleaning recipe.
pub fn clean_frame(df: DataFrame) -> Result<(DataFrame, CleaningReport)> {
    let mut report = CleaningReport::default();
    let mut df = df;

    // Missing values: drop sparse columns, impute the rest
    let height = df.height().max(1) as f64;
    let mut fills: Vec<Expr> = Vec::new();
    for series in df.get_columns() {
        let name = series.name().to_string();
        let missing = series.null_count();
        let ratio = missing as f64 / height;

        if ratio > MAX_MISSING_RATIO {
            info!("Dropping column '{}' due to {:.2}% missing values", name, ratio * 100.0);
            report.dropped_columns.push(name);
            continue;
        }
        if missing == 0 {
            continue;
        }

        if series.dtype().is_numeric() {
            debug!("Imputing {} missing values in '{}' with median", missing, name);
            fills.push(col(&name).fill_null(col(&name).median()));
            report.median_imputed.push(name);
        } else if let Some(mode) = mode_literal(series)? {
            debug!("Imputing {} missing values in '{}' with mode", missing, name);
            fills.push(col(&name).fill_null(mode));
            report.mode_imputed.push(name);
        }
    }

    for name in &report.dropped_columns {
        df = df.drop(name)?;
    }
    if !fills.is_empty() {
        df = df.lazy().with_columns(fills).collect()?;
    }

    // Duplicate rows
    let before = df.height();
    df = df
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    report.duplicates_removed = before - df.height();
    if report.duplicates_removed > 0 {
        info!("Removed {} duplicate rows", report.duplicates_removed);
    }

    // Date-like text
    let text_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|s| s.dtype() == &DataType::String)
        .map(|s| s.name().to_string())
        .collect();
    for name in text_columns {
        let parsed: Vec<Option<i64>> = df
            .column(&name)?
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_date_text).map(|dt| dt.and_utc().timestamp_millis()))
            .collect();
        let valid = parsed.iter().filter(|v| v.is_some()).count();
        if df.height() == 0 || valid as f64 / df.height() as f64 <= MIN_DATE_RATIO {
            continue;
        }
        let series = Series::new(&name, parsed).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        df.replace(&name, series)?;
        info!("Converted column '{}' to datetime ({} of {} values parsed)", name, valid, df.height());
        report.date_columns.push(name);
    }

    // yes/no and true/false text flags
    let flag_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|s| s.dtype() == &DataType::String)
        .filter_map(|s| flag_vocabulary(s).map(|_| s.name().to_string()))
        .collect();
    for name in flag_columns {
        let truthy = {
            let series = df.column(&name)?;
            flag_vocabulary(series).unwrap_or("yes")
        };
        let mapped: Int32Chunked = df
            .column(&name)?
            .str()?
            .into_iter()
            .map(|v| v.map(|v| i32::from(v.trim().to_lowercase() == truthy)))
            .collect();
        df.replace(&name, mapped.into_series().with_name(&name))?;
        info!("Converted flag text in column '{}' to 1/0", name);
        report.flag_columns.push(name);
    }

    // Column names
    let original: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let normalized: Vec<String> = original.iter().map(|n| normalize_column_name(n)).collect();
    let unique: BTreeSet<&String> = normalized.iter().collect();
    if unique.len() != normalized.len() {
        return Err(SmartQueryError::Ingestion(format!(
            "Column names collide after normalization: {:?}",
            normalized
        )));
    }
    df.set_column_names(&normalized)?;
    report.renamed_columns = original
        .into_iter()
        .zip(normalized)
        .filter(|(from, to)| from != to)
        .collect();

    info!(
        "Data cleaning completed: {} rows x {} columns",
        df.height(),
        df.width()
    );
    Ok((df, report))
}

/// Most frequent non-null value as a literal; ties go to the smallest value.
fn mode_literal(series: &Series) -> Result<Option<Expr>> {
    match series.dtype() {
        DataType::String => {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for value in series.str()?.into_iter().flatten() {
                *counts.entry(value).or_insert(0) += 1;
            }
            let mode = counts
                .into_iter()
                .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
                .map(|(value, _)| lit(value.to_string()));
            Ok(mode)
        }
        DataType::Boolean => {
            let ca = series.bool()?;
            let trues = ca.into_iter().flatten().filter(|b| *b).count();
            let falses = ca.len() - ca.null_count() - trues;
            if trues + falses == 0 {
                return Ok(None);
            }
            // false < true, so a tie goes to false
            Ok(Some(lit(trues > falses)))
        }
        _ => Ok(None),
    }
}

/// Truthy word when a text column holds exactly {yes, no} or {true, false}.
fn flag_vocabulary(series: &Series) -> Option<&'static str> {
    let ca = series.str().ok()?;
    let values: BTreeSet<String> = ca
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_lowercase())
        .collect();

    let as_refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
    match as_refs.as_slice() {
        ["no", "yes"] => Some("yes"),
        ["false", "true"] => Some("true"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("smart_query_ingest_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("  Order Date "), "order_date");
        assert_eq!(normalize_column_name("Unit-Price"), "unit_price");
        assert_eq!(normalize_column_name("region"), "region");
    }

    #[test]
    fn test_rejects_unsupported_and_empty_files() {
        // corrupt workbook
        let xlsx = temp_file("data.xlsx", "not really excel");
        assert!(matches!(
            read_and_validate_file(&xlsx, None),
            Err(SmartQueryError::Ingestion(_))
        ));

        let json = temp_file("data.json", "[]");
        assert!(matches!(
            read_and_validate_file(&json, None),
            Err(SmartQueryError::Ingestion(_))
        ));

        let empty = temp_file("empty.csv", "a,b\n");
        assert!(matches!(
            read_and_validate_file(&empty, None),
            Err(SmartQueryError::Ingestion(_))
        ));
    }

    #[test]
    fn test_reads_csv_case_insensitive_extension() {
        let path = temp_file("DATA.CSV", "Region,Sales\nwest,10\neast,20\n");
        let df = read_and_validate_file(&path, None).unwrap();
        assert_eq!(df.shape(), (2, 2));
    }

    #[test]
    fn test_clean_frame_recipe() {
        let df = df![
            "Customer Name" => ["ana", "bo", "bo", "cy", "di"],
            "Unit-Price" => [Some(10.0), Some(30.0), Some(30.0), None, Some(20.0)],
            "Subscribed" => ["Yes", "no", "no", "YES", "No"],
            "Notes" => [None::<&str>, None, None, Some("x"), None],
            "Region" => [Some("west"), Some("east"), Some("east"), Some("west"), None]
        ]
        .unwrap();

        let (clean, report) = clean_frame(df).unwrap();

        assert_eq!(report.dropped_columns, vec!["Notes".to_string()]);
        assert_eq!(report.median_imputed, vec!["Unit-Price".to_string()]);
        assert_eq!(report.mode_imputed, vec!["Region".to_string()]);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.flag_columns, vec!["Subscribed".to_string()]);

        assert_eq!(
            clean.get_column_names(),
            vec!["customer_name", "unit_price", "subscribed", "region"]
        );
        assert_eq!(clean.height(), 4);

        let price = clean.column("unit_price").unwrap().f64().unwrap();
        // median of 10, 30, 30, 20 is taken before duplicates are removed
        assert_eq!(price.get(2), Some(25.0));
        let subscribed = clean.column("subscribed").unwrap().i32().unwrap();
        assert_eq!(subscribed.into_iter().collect::<Vec<_>>(), vec![Some(1), Some(0), Some(1), Some(0)]);
        let region = clean.column("region").unwrap().str().unwrap();
        // west and east tie; the smaller value wins
        assert_eq!(region.get(3), Some("east"));
    }

    #[test]
    fn test_frame_from_worksheet_range() {
        let mut range: Range<Data> = Range::new((0, 0), (3, 4));
        let header = ["Region", "Units", "Price", "Active", ""];
        for (col, title) in header.iter().enumerate() {
            if !title.is_empty() {
                range.set_value((0, col as u32), Data::String(title.to_string()));
            }
        }
        let body = [
            [Data::String("west".into()), Data::Float(3.0), Data::Float(9.5), Data::Bool(true), Data::Int(1)],
            [Data::String("east".into()), Data::Int(4), Data::Int(10), Data::Bool(false), Data::String("x".into())],
            [Data::Empty, Data::Float(5.0), Data::Float(2.25), Data::Empty, Data::Int(3)],
        ];
        for (row, cells) in body.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                range.set_value((row as u32 + 1, col as u32), cell.clone());
            }
        }

        let df = frame_from_range(&range).unwrap();

        assert_eq!(df.shape(), (3, 5));
        assert_eq!(
            df.get_column_names(),
            vec!["Region", "Units", "Price", "Active", "column_5"]
        );
        assert_eq!(df.column("Region").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("Region").unwrap().null_count(), 1);
        assert_eq!(df.column("Units").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("Price").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("Active").unwrap().dtype(), &DataType::Boolean);
        // mixed numbers and text fall back to text
        assert_eq!(df.column("column_5").unwrap().dtype(), &DataType::String);

        let units = df.column("Units").unwrap().i64().unwrap();
        assert_eq!(units.into_iter().collect::<Vec<_>>(), vec![Some(3), Some(4), Some(5)]);
    }

    #[test]
    fn test_empty_worksheet_gives_empty_frame() {
        let range: Range<Data> = Range::empty();
        assert_eq!(frame_from_range(&range).unwrap().width(), 0);
    }

    #[test]
    fn test_missing_workbook_is_an_ingestion_error() {
        let dir = std::env::temp_dir().join(format!("smart_query_ingest_{}", uuid::Uuid::new_v4()));
        let path = dir.join("absent.XLSX");
        assert!(matches!(
            read_and_validate_file(&path, Some("Sheet2")),
            Err(SmartQueryError::Ingestion(_))
        ));
    }

    #[test]
    fn test_parse_date_text_layouts() {
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_date_text("2024-01-05"), Some(jan5));
        assert_eq!(parse_date_text("01/05/2024"), Some(jan5));
        assert_eq!(parse_date_text("2024/01/05"), Some(jan5));
        assert_eq!(parse_date_text("January 5, 2024"), Some(jan5));
        assert_eq!(parse_date_text(" 05.01.2024 "), Some(jan5));
        assert_eq!(
            parse_date_text("2024-01-05 13:45:00"),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().and_hms_opt(13, 45, 0)
        );
        assert_eq!(parse_date_text("soon"), None);
        assert_eq!(parse_date_text(""), None);
    }

    #[test]
    fn test_mixed_format_dates_are_converted() {
        let df = df![
            "Order Date" => ["2024-01-05", "01/07/2024", "2024/02/10", "March 3, 2024", "05.04.2024", "soon"],
            "Status" => ["2024-01-05", "pending", "pending", "open", "closed", "2024-02-01"]
        ]
        .unwrap();

        let (clean, report) = clean_frame(df).unwrap();

        assert_eq!(report.date_columns, vec!["Order Date".to_string()]);
        let dates = clean.column("order_date").unwrap();
        assert_eq!(dates.dtype(), &DataType::Datetime(TimeUnit::Milliseconds, None));
        // the one unparseable value becomes null
        assert_eq!(dates.null_count(), 1);
        let jan5 = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert_eq!(dates.datetime().unwrap().get(0), Some(jan5));

        // two of six values parse, so the column stays text
        assert_eq!(clean.column("status").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_colliding_names_are_rejected() {
        let df = df![
            "first name" => [1i64],
            "First-Name" => [2i64]
        ]
        .unwrap();
        assert!(matches!(clean_frame(df), Err(SmartQueryError::Ingestion(_))));
    }
}
