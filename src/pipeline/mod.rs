//! Turning user input into wire payloads.
//!
//! A [`FeatureSchema`] fetched through the [`SchemaRegistry`] fixes the
//! column order; [`FeatureEncoder`] validates and encodes raw strings against
//! it and [`compile_prediction`] joins the tokens. Training forms need no
//! schema and go straight through [`compile_training`].

mod compiler;
mod encoder;
mod errors;
pub mod registry;
mod schema;

pub use compiler::{
    FEATURE_VALUES_FIELD, FIELD_DELIMITER, ModelType, PredictionRequest, TrainingForm,
    TrainingRequest, compile_prediction, compile_training,
};
pub use encoder::{EncodedFeatures, FeatureEncoder, RawInputs, normalize_number};
pub use errors::{InputError, ValidationReason};
pub use registry::{FetchTicket, SchemaFetch, SchemaFetchError, SchemaRegistry, SchemaResolution};
pub use schema::{
    CategoryEncoder, Column, ColumnWire, Dtype, EncoderWire, FeatureSchema, NumericKind,
    PreprocessingWire, SchemaError, SchemaWire,
};
