//! Schema Descriptor
//!
//! Normalized view of the dataset's columns, produced from a cleaned frame or
//! parsed from the EDA collaborator's JSON (`{"columns": {name: {"dtype": ..}}}`).
//! Column order is preserved in both directions so prompts list columns the
//! way the dataset does.

use crate::error::{Result, SmartQueryError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type family of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Datetime,
    Boolean,
    Other,
}

impl ColumnKind {
    /// Interpret a dtype tag. Accepts both our own tags and the engine-style
    /// names an external EDA step emits (`int64`, `object`, `datetime64[ns]`).
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        match tag.as_str() {
            "numeric" | "number" => ColumnKind::Numeric,
            "categorical" | "category" | "object" | "string" | "str" | "utf8" => {
                ColumnKind::Categorical
            }
            "boolean" | "bool" => ColumnKind::Boolean,
            t if t.starts_with("int") || t.starts_with("uint") || t.starts_with("float") => {
                ColumnKind::Numeric
            }
            t if t.starts_with("datetime") || t == "date" || t == "time" => ColumnKind::Datetime,
            _ => ColumnKind::Other,
        }
    }

    pub fn from_dtype(dtype: &DataType) -> Self {
        if dtype.is_numeric() {
            return ColumnKind::Numeric;
        }
        match dtype {
            DataType::String => ColumnKind::Categorical,
            DataType::Boolean => ColumnKind::Boolean,
            DataType::Date | DataType::Datetime(_, _) => ColumnKind::Datetime,
            _ => ColumnKind::Other,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
            ColumnKind::Datetime => "datetime",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Other => "other",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Per-column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Declared type tag
    pub dtype: String,

    /// Engine dtype the tag was derived from, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_dtype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_count: Option<usize>,
}

impl ColumnMeta {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            dtype: kind.as_tag().to_string(),
            engine_dtype: None,
            missing_count: None,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_tag(&self.dtype)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(with = "ordered_columns")]
    columns: Vec<(String, ColumnMeta)>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column. Names are unique; a second insert of the same name fails.
    pub fn push(&mut self, name: impl Into<String>, meta: ColumnMeta) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(SmartQueryError::Schema(format!("duplicate column '{}'", name)));
        }
        self.columns.push((name, meta));
        Ok(())
    }

    /// Builder form of [`push`](Self::push) for tests and fixtures.
    pub fn with_column(mut self, name: &str, kind: ColumnKind) -> Result<Self> {
        self.push(name, ColumnMeta::new(kind))?;
        Ok(self)
    }

    /// Describe a frame. Names are taken verbatim: they are the canonical casing.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let mut schema = Self::new();
        for series in df.get_columns() {
            let dtype = series.dtype();
            schema.push(
                series.name().to_string(),
                ColumnMeta {
                    dtype: ColumnKind::from_dtype(dtype).as_tag().to_string(),
                    engine_dtype: Some(dtype.to_string()),
                    missing_count: Some(series.null_count()),
                },
            )?;
        }
        Ok(schema)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnMeta)> {
        self.columns.iter().map(|(n, m)| (n.as_str(), m))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Case-insensitive lookup returning the canonical column name.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(n, _)| n.as_str())
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, m)| m.kind() == kind)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Compact JSON used inside generation prompts.
    pub fn to_prompt_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Serde adapter keeping `columns` as a JSON object without losing order.
mod ordered_columns {
    use super::ColumnMeta;
    use serde::de::{self, MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(columns: &[(String, ColumnMeta)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(columns.len()))?;
        for (name, meta) in columns {
            map.serialize_entry(name, meta)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, ColumnMeta)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColumnsVisitor;

        impl<'de> Visitor<'de> for ColumnsVisitor {
            type Value = Vec<(String, ColumnMeta)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column name to column metadata")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut columns: Vec<(String, ColumnMeta)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, meta)) = access.next_entry::<String, ColumnMeta>()? {
                    if columns.iter().any(|(n, _)| *n == name) {
                        return Err(de::Error::custom(format!("duplicate column '{}'", name)));
                    }
                    columns.push((name, meta));
                }
                Ok(columns)
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_eda_json_keeps_order_and_ignores_extra_fields() {
        let json = r#"{
            "num_rows": 4,
            "columns": {
                "product": {"dtype": "object", "top_categories": {"a": 2}},
                "sales": {"dtype": "float64", "missing_count": 0},
                "year": {"dtype": "int64"},
                "order_date": {"dtype": "datetime64[ns]"}
            }
        }"#;

        let schema = SchemaDescriptor::from_json(json).unwrap();
        assert_eq!(schema.column_names(), vec!["product", "sales", "year", "order_date"]);
        assert_eq!(schema.get("product").unwrap().kind(), ColumnKind::Categorical);
        assert_eq!(schema.get("sales").unwrap().kind(), ColumnKind::Numeric);
        assert_eq!(schema.get("order_date").unwrap().kind(), ColumnKind::Datetime);
        assert_eq!(schema.get("sales").unwrap().missing_count, Some(0));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let json = r#"{"columns": {"a": {"dtype": "numeric"}, "a": {"dtype": "numeric"}}}"#;
        assert!(SchemaDescriptor::from_json(json).is_err());

        let schema = SchemaDescriptor::new().with_column("a", ColumnKind::Numeric).unwrap();
        assert!(schema.with_column("a", ColumnKind::Other).is_err());
    }

    #[test]
    fn test_from_frame() {
        let df = df![
            "region" => ["west", "east"],
            "sales" => [Some(10.5), None],
            "units" => [1i64, 2],
            "active" => [true, false]
        ]
        .unwrap();

        let schema = SchemaDescriptor::from_frame(&df).unwrap();
        assert_eq!(schema.column_names(), vec!["region", "sales", "units", "active"]);
        assert_eq!(schema.get("region").unwrap().dtype, "categorical");
        assert_eq!(schema.get("sales").unwrap().missing_count, Some(1));
        assert_eq!(schema.columns_of_kind(ColumnKind::Numeric), vec!["sales", "units"]);
        assert_eq!(schema.get("active").unwrap().kind(), ColumnKind::Boolean);
    }

    #[test]
    fn test_canonical_name_is_case_insensitive() {
        let schema = SchemaDescriptor::new()
            .with_column("Region", ColumnKind::Categorical)
            .unwrap();
        assert_eq!(schema.canonical_name("REGION"), Some("Region"));
        assert_eq!(schema.canonical_name("regions"), None);
    }

    #[test]
    fn test_prompt_json_round_trip_preserves_order() {
        let schema = SchemaDescriptor::new()
            .with_column("zeta", ColumnKind::Numeric)
            .unwrap()
            .with_column("alpha", ColumnKind::Categorical)
            .unwrap();
        let json = schema.to_prompt_json().unwrap();
        assert!(json.find("zeta").unwrap() < json.find("alpha").unwrap());
        assert_eq!(SchemaDescriptor::from_json(&json).unwrap(), schema);
    }
}
