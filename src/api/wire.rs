//! Response shapes returned by the model management service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DatasetId, ModelId};

/// Uploaded dataset snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Column names in file order.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub row_count: u64,
    pub created_at: String,
}

/// Trained model summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub model_type: String,
    /// Weak reference; the dataset may have been deleted since training.
    #[serde(default)]
    pub dataset_id: Option<DatasetId>,
    #[serde(default)]
    pub feature_columns: Vec<String>,
    #[serde(default)]
    pub target_column: Option<String>,
    pub created_at: String,
}

/// Output of a prediction request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// One value per input row, in request order.
    pub predictions: Vec<Value>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

/// Model created by a training request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    #[serde(alias = "id")]
    pub model_id: ModelId,
    #[serde(default)]
    pub message: Option<String>,
}

/// Acknowledgement of a dataset upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetUploaded {
    #[serde(alias = "id")]
    pub dataset_id: DatasetId,
    #[serde(default)]
    pub message: Option<String>,
}

/// One stored prediction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    #[serde(default)]
    pub input_data: Value,
    #[serde(alias = "prediction_result")]
    pub prediction: Value,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    pub created_at: String,
}

/// A page of prediction history, newest first.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionHistoryPage {
    pub records: Vec<PredictionRecord>,
    pub page: u32,
    /// Total pages when the backend reports pagination.
    pub pages: Option<u32>,
    pub total: Option<u64>,
}

impl PredictionHistoryPage {
    /// Whether another page is known to exist after this one.
    pub fn has_next(&self) -> bool {
        self.pages.is_some_and(|pages| self.page < pages)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum HistoryWire {
    Paged {
        predictions: Vec<PredictionRecord>,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        pages: Option<u32>,
        #[serde(default)]
        current_page: Option<u32>,
    },
    Bare(Vec<PredictionRecord>),
}

impl HistoryWire {
    pub(crate) fn into_page(self, requested_page: u32) -> PredictionHistoryPage {
        match self {
            Self::Paged {
                predictions,
                total,
                pages,
                current_page,
            } => PredictionHistoryPage {
                records: predictions,
                page: current_page.unwrap_or(requested_page),
                pages,
                total,
            },
            Self::Bare(records) => PredictionHistoryPage {
                records,
                page: requested_page,
                pages: None,
                total: None,
            },
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct LoginWire {
    pub(crate) access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paged_history_envelope() {
        let json = r#"{
            "predictions": [
                {"id": 9, "input_data": {"feature_values": "34,0"},
                 "prediction_result": [1], "confidence_score": 0.8,
                 "created_at": "2024-03-01T10:00:00"}
            ],
            "total": 11, "pages": 2, "current_page": 1
        }"#;
        let wire: HistoryWire = serde_json::from_str(json).unwrap();
        let page = wire.into_page(1);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].prediction, serde_json::json!([1]));
        assert_eq!(page.total, Some(11));
        assert!(page.has_next());
    }

    #[test]
    fn parses_bare_history_list() {
        let json = r#"[{"id": 1, "input_data": null, "prediction": "yes",
                        "created_at": "2024-03-01T10:00:00"}]"#;
        let wire: HistoryWire = serde_json::from_str(json).unwrap();
        let page = wire.into_page(3);
        assert_eq!(page.page, 3);
        assert_eq!(page.pages, None);
        assert!(!page.has_next());
    }

    #[test]
    fn trained_model_accepts_id_alias() {
        let trained: TrainedModel =
            serde_json::from_str(r#"{"message": "Model trained successfully", "model_id": 4}"#)
                .unwrap();
        assert_eq!(trained.model_id, ModelId(4));
        let trained: TrainedModel = serde_json::from_str(r#"{"id": 5, "name": "m"}"#).unwrap();
        assert_eq!(trained.model_id, ModelId(5));
    }

    #[test]
    fn model_listing_tolerates_missing_optional_fields() {
        let json = r#"[{"id": 2, "name": "churn", "model_type": "svm",
                        "created_at": "2024-01-01T00:00:00", "dataset_id": 3}]"#;
        let models: Vec<Model> = serde_json::from_str(json).unwrap();
        assert_eq!(models[0].dataset_id, Some(DatasetId(3)));
        assert!(models[0].feature_columns.is_empty());
    }
}
