//! Wire payloads for prediction and training requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::encoder::EncodedFeatures;
use super::errors::{InputError, ValidationReason};
use crate::api::{DatasetId, ModelId};

/// Separator between positional feature tokens in `feature_values`.
pub const FIELD_DELIMITER: char = ',';

/// Name of the single form field carrying a prediction row.
pub const FEATURE_VALUES_FIELD: &str = "feature_values";

/// A prediction row ready to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredictionRequest {
    model_id: ModelId,
    feature_values: String,
}

impl PredictionRequest {
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Comma-joined tokens in schema column order.
    pub fn feature_values(&self) -> &str {
        &self.feature_values
    }

    /// Form fields of the request body.
    pub fn form_fields(&self) -> [(&'static str, &str); 1] {
        [(FEATURE_VALUES_FIELD, self.feature_values.as_str())]
    }
}

/// Join encoded tokens into the positional wire string.
pub fn compile_prediction(features: &EncodedFeatures) -> PredictionRequest {
    let mut feature_values = String::new();
    for (index, token) in features.tokens().iter().enumerate() {
        if index > 0 {
            feature_values.push(FIELD_DELIMITER);
        }
        feature_values.push_str(token);
    }
    PredictionRequest {
        model_id: features.model_id(),
        feature_values,
    }
}

/// Estimators the backend can train.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    LinearRegression,
    LogisticRegression,
    RandomForest,
    DecisionTree,
    Svm,
}

impl ModelType {
    pub const ALL: [Self; 5] = [
        Self::LinearRegression,
        Self::LogisticRegression,
        Self::RandomForest,
        Self::DecisionTree,
        Self::Svm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinearRegression => "linear_regression",
            Self::LogisticRegression => "logistic_regression",
            Self::RandomForest => "random_forest",
            Self::DecisionTree => "decision_tree",
            Self::Svm => "svm",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or(())
    }
}

/// Training parameters as typed by the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrainingForm {
    pub dataset_id: String,
    pub target_column: String,
    pub model_type: String,
    pub name: String,
    pub description: Option<String>,
    pub drop_columns: Vec<String>,
}

/// Body of `POST /train`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrainingRequest {
    pub dataset_id: DatasetId,
    pub target_column: String,
    pub ml_model_type: ModelType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drop_columns: Vec<String>,
}

/// Validate a training form and build the request body.
pub fn compile_training(form: &TrainingForm) -> Result<TrainingRequest, InputError> {
    let dataset_id = required("dataset_id", &form.dataset_id)?;
    let dataset_id = dataset_id
        .parse::<DatasetId>()
        .map_err(|_| InputError::validation("dataset_id", ValidationReason::NotNumeric))?;
    let target_column = required("target_column", &form.target_column)?;
    let model_type = required("ml_model_type", &form.model_type)?;
    let ml_model_type = model_type
        .parse::<ModelType>()
        .map_err(|_| InputError::validation("ml_model_type", ValidationReason::UnknownModelType))?;
    let name = required("name", &form.name)?;
    let description = form
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);
    let drop_columns = form
        .drop_columns
        .iter()
        .map(|column| column.trim())
        .filter(|column| !column.is_empty())
        .map(str::to_string)
        .collect();
    Ok(TrainingRequest {
        dataset_id,
        target_column: target_column.to_string(),
        ml_model_type,
        name: name.to_string(),
        description,
        drop_columns,
    })
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, InputError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InputError::validation(field, ValidationReason::Required));
    }
    Ok(trimmed)
}
