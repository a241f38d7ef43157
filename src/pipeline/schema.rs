//! Feature schema of a trained model and its wire representation.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::api::ModelId;

/// Numeric storage class of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericKind {
    Integer,
    Float,
}

/// Declared semantic type of a schema column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    Numeric(NumericKind),
    Categorical,
    Text,
}

impl Dtype {
    /// Map a backend dtype string (pandas/numpy naming) to a tag.
    ///
    /// Unrecognized names fall back to [`Dtype::Text`].
    pub fn from_wire(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        let name = lowered.as_str();
        if sized_name(name.strip_prefix('u').unwrap_or(name), "int") || name == "integer" {
            return Self::Numeric(NumericKind::Integer);
        }
        if sized_name(name, "float") || matches!(name, "double" | "number" | "numeric" | "decimal") {
            return Self::Numeric(NumericKind::Float);
        }
        match name {
            "object" | "category" | "categorical" | "bool" | "boolean" => Self::Categorical,
            _ => Self::Text,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Numeric(_))
    }
}

/// `int`, `int64`, `float32`, ... but not `interval`.
fn sized_name(name: &str, family: &str) -> bool {
    name.strip_prefix(family)
        .is_some_and(|bits| bits.chars().all(|ch| ch.is_ascii_digit()))
}

/// One input column; its position in the schema is its wire position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub dtype: Dtype,
    /// The dtype string as reported by the backend.
    pub raw_dtype: String,
}

/// Mapping from raw categorical value to integer code for one column.
pub type CategoryEncoder = BTreeMap<String, i64>;

/// Ordered input columns of a model plus optional categorical encoders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureSchema {
    model_id: ModelId,
    columns: Vec<Column>,
    encoders: BTreeMap<String, CategoryEncoder>,
}

/// Reasons a schema response cannot be used.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema for model {model_id} has no columns")]
    NoColumns { model_id: ModelId },
    #[error("Schema for model {model_id} has a column without a name")]
    UnnamedColumn { model_id: ModelId },
    #[error("Schema for model {model_id} lists column {column:?} twice")]
    DuplicateColumn { model_id: ModelId, column: String },
    #[error("Schema for model {model_id} has an encoder for unknown column {column:?}")]
    UnknownEncoderColumn { model_id: ModelId, column: String },
    #[error("Encoder for column {column:?} has unusable code for {value:?}")]
    InvalidCode { column: String, value: String },
}

impl FeatureSchema {
    /// Build a schema, checking column names are unique and encoders refer to
    /// known columns.
    pub fn new(
        model_id: ModelId,
        columns: Vec<Column>,
        encoders: BTreeMap<String, CategoryEncoder>,
    ) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::NoColumns { model_id });
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.name.trim().is_empty() {
                return Err(SchemaError::UnnamedColumn { model_id });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    model_id,
                    column: column.name.clone(),
                });
            }
        }
        if let Some(column) = encoders.keys().find(|name| !seen.contains(name.as_str())) {
            return Err(SchemaError::UnknownEncoderColumn {
                model_id,
                column: column.clone(),
            });
        }
        Ok(Self {
            model_id,
            columns,
            encoders,
        })
    }

    /// Convert the backend's schema response.
    pub fn from_wire(model_id: ModelId, wire: SchemaWire) -> Result<Self, SchemaError> {
        let columns = wire
            .columns
            .into_iter()
            .map(|column| Column {
                dtype: Dtype::from_wire(&column.dtype),
                name: column.name,
                raw_dtype: column.dtype,
            })
            .collect();
        let mut encoders = BTreeMap::new();
        let label_encoders = wire
            .preprocessing
            .and_then(|preprocessing| preprocessing.label_encoders)
            .unwrap_or_default();
        for (column, encoder) in label_encoders {
            let codes = encoder.into_codes(&column)?;
            encoders.insert(column, codes);
        }
        Self::new(model_id, columns, encoders)
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn encoder(&self, column: &str) -> Option<&CategoryEncoder> {
        self.encoders.get(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// `GET /predict/{id}` response body.
#[derive(Clone, Debug, Deserialize)]
pub struct SchemaWire {
    pub columns: Vec<ColumnWire>,
    #[serde(default)]
    pub preprocessing: Option<PreprocessingWire>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColumnWire {
    pub name: String,
    pub dtype: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PreprocessingWire {
    #[serde(default)]
    pub label_encoders: Option<BTreeMap<String, EncoderWire>>,
}

/// An encoder is either an explicit `{value: code}` map or the list of
/// known classes, where a class's code is its index.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum EncoderWire {
    Codes(BTreeMap<String, Value>),
    Classes(Vec<Value>),
}

impl EncoderWire {
    fn into_codes(self, column: &str) -> Result<CategoryEncoder, SchemaError> {
        match self {
            Self::Codes(codes) => codes
                .into_iter()
                .map(|(value, code)| match code.as_i64() {
                    Some(code) => Ok((value, code)),
                    None => Err(SchemaError::InvalidCode {
                        column: column.to_string(),
                        value,
                    }),
                })
                .collect(),
            Self::Classes(classes) => {
                let mut codes = CategoryEncoder::new();
                for (index, class) in classes.iter().enumerate() {
                    // First occurrence wins so duplicated classes keep a stable code.
                    codes.entry(class_label(class)).or_insert(index as i64);
                }
                Ok(codes)
            }
        }
    }
}

fn class_label(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<FeatureSchema, SchemaError> {
        let wire: SchemaWire = serde_json::from_str(json).unwrap();
        FeatureSchema::from_wire(ModelId(1), wire)
    }

    #[test]
    fn maps_pandas_dtypes() {
        assert_eq!(Dtype::from_wire("int64"), Dtype::Numeric(NumericKind::Integer));
        assert_eq!(Dtype::from_wire("UInt8"), Dtype::Numeric(NumericKind::Integer));
        assert_eq!(Dtype::from_wire("float32"), Dtype::Numeric(NumericKind::Float));
        assert_eq!(Dtype::from_wire("object"), Dtype::Categorical);
        assert_eq!(Dtype::from_wire("bool"), Dtype::Categorical);
        assert_eq!(Dtype::from_wire("string"), Dtype::Text);
        assert_eq!(Dtype::from_wire("datetime64[ns]"), Dtype::Text);
        assert_eq!(Dtype::from_wire("interval"), Dtype::Text);
    }

    #[test]
    fn keeps_column_order_from_response() {
        let schema = parse(
            r#"{"columns": [{"name": "zeta", "dtype": "int64"},
                            {"name": "alpha", "dtype": "object"},
                            {"name": "mid", "dtype": "float64"}]}"#,
        )
        .unwrap();
        let names: Vec<_> = schema.column_names().collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert!(schema.encoder("alpha").is_none());
    }

    #[test]
    fn accepts_code_map_encoders() {
        let schema = parse(
            r#"{"columns": [{"name": "city", "dtype": "object"}],
                "preprocessing": {"label_encoders": {"city": {"NYC": 0, "LA": 1}}}}"#,
        )
        .unwrap();
        let encoder = schema.encoder("city").unwrap();
        assert_eq!(encoder.get("LA"), Some(&1));
    }

    #[test]
    fn accepts_class_list_encoders() {
        let schema = parse(
            r#"{"columns": [{"name": "plan", "dtype": "object"}],
                "preprocessing": {"label_encoders": {"plan": ["basic", "pro", "basic", 3]}}}"#,
        )
        .unwrap();
        let encoder = schema.encoder("plan").unwrap();
        assert_eq!(encoder.get("basic"), Some(&0));
        assert_eq!(encoder.get("pro"), Some(&1));
        assert_eq!(encoder.get("3"), Some(&3));
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = parse(
            r#"{"columns": [{"name": "a", "dtype": "int64"}, {"name": "a", "dtype": "int64"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));
    }

    #[test]
    fn rejects_encoder_for_unknown_column() {
        let err = parse(
            r#"{"columns": [{"name": "a", "dtype": "int64"}],
                "preprocessing": {"label_encoders": {"b": {"x": 0}}}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownEncoderColumn {
                model_id: ModelId(1),
                column: "b".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_integer_codes() {
        let err = parse(
            r#"{"columns": [{"name": "a", "dtype": "object"}],
                "preprocessing": {"label_encoders": {"a": {"x": "zero"}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidCode { .. }));
    }

    #[test]
    fn rejects_empty_schema() {
        let err = parse(r#"{"columns": []}"#).unwrap_err();
        assert!(matches!(err, SchemaError::NoColumns { .. }));
    }
}
