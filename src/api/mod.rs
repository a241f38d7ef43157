//! Transport to the model management service.
//!
//! [`ApiGateway`] is the seam the workflow talks through; [`HttpGateway`] is
//! the ureq implementation. Catalog endpoints (datasets, models, account)
//! are inherent methods on [`HttpGateway`] because nothing in the request
//! pipeline depends on them.

mod catalog;
mod context;
mod error;
mod http;
mod ids;
mod multipart;
pub mod wire;

pub use context::{ApiContext, TOKEN_ENV};
pub use error::ApiError;
pub use http::HttpGateway;
pub use ids::{DatasetId, ModelId};
pub use wire::{
    Dataset, DatasetUploaded, Model, PredictionHistoryPage, PredictionRecord, PredictionResult,
    TrainedModel,
};

use crate::pipeline::{FeatureSchema, PredictionRequest, TrainingRequest};

/// Calls the workflow needs from the backend.
///
/// Implementations are invoked from worker threads and must not retry on
/// their own; the caller decides when to re-issue a request.
pub trait ApiGateway: Send + Sync {
    /// Ordered input columns and encoders of a trained model.
    fn fetch_schema(&self, model_id: ModelId) -> Result<FeatureSchema, ApiError>;

    /// Run one prediction row.
    fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, ApiError>;

    /// Start training a new model.
    fn train(&self, request: &TrainingRequest) -> Result<TrainedModel, ApiError>;

    /// One page (1-based) of stored predictions for a model.
    fn prediction_history(
        &self,
        model_id: ModelId,
        page: u32,
        per_page: u32,
    ) -> Result<PredictionHistoryPage, ApiError>;
}
