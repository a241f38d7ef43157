//! ureq-backed gateway.

use serde::de::DeserializeOwned;

use super::wire::HistoryWire;
use super::{
    ApiContext, ApiError, ApiGateway, ModelId, PredictionHistoryPage, PredictionResult,
    TrainedModel, error::map_status_error,
};
use crate::config::{AppConfig, ConfigError, HttpSettings};
use crate::http_client;
use crate::pipeline::{FeatureSchema, PredictionRequest, SchemaWire, TrainingRequest};

/// Gateway issuing blocking HTTP calls with a shared agent.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    agent: ureq::Agent,
    context: ApiContext,
    max_response_bytes: usize,
}

impl HttpGateway {
    pub fn new(context: ApiContext, settings: &HttpSettings) -> Self {
        Self {
            agent: http_client::build_agent(settings),
            context,
            max_response_bytes: settings.max_response_bytes,
        }
    }

    /// Build a gateway from config, taking the token from the environment.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let context = ApiContext::new(config.base_url()?).with_env_token();
        Ok(Self::new(context, &config.http))
    }

    pub fn context(&self) -> &ApiContext {
        &self.context
    }

    /// Same transport settings, different context (e.g. after login).
    pub fn with_context(&self, context: ApiContext) -> Self {
        Self {
            agent: self.agent.clone(),
            context,
            max_response_bytes: self.max_response_bytes,
        }
    }

    pub(super) fn request(&self, method: &str, path: &str) -> Result<ureq::Request, ApiError> {
        let url = self.context.endpoint(path)?;
        let mut request = self
            .agent
            .request_url(method, &url)
            .set("Accept", "application/json");
        if let Some(authorization) = self.context.authorization() {
            request = request.set("Authorization", &authorization);
        }
        Ok(request)
    }

    pub(super) fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.request("GET", path)?;
        self.read_json(request.call())
    }

    pub(super) fn read_json<T: DeserializeOwned>(
        &self,
        outcome: Result<ureq::Response, ureq::Error>,
    ) -> Result<T, ApiError> {
        let body = self.read_text(outcome)?;
        parse_json(&body)
    }

    pub(super) fn read_text(
        &self,
        outcome: Result<ureq::Response, ureq::Error>,
    ) -> Result<String, ApiError> {
        let response = self.check_status(outcome)?;
        read_body_limited(response, self.max_response_bytes).map_err(ApiError::Io)
    }

    pub(super) fn check_status(
        &self,
        outcome: Result<ureq::Response, ureq::Error>,
    ) -> Result<ureq::Response, ApiError> {
        match outcome {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, response)) => {
                let body = read_body_limited(response, self.max_response_bytes)
                    .unwrap_or_else(|err| err);
                Err(map_status_error(code, &body))
            }
            Err(ureq::Error::Transport(err)) => Err(ApiError::Transport(err.to_string())),
        }
    }
}

impl ApiGateway for HttpGateway {
    fn fetch_schema(&self, model_id: ModelId) -> Result<FeatureSchema, ApiError> {
        let wire: SchemaWire = self.get_json(&format!("predict/{model_id}"))?;
        FeatureSchema::from_wire(model_id, wire).map_err(|err| ApiError::Json(err.to_string()))
    }

    fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, ApiError> {
        let http = self.request("POST", &format!("predict/{}", request.model_id()))?;
        self.read_json(http.send_form(&request.form_fields()))
    }

    fn train(&self, request: &TrainingRequest) -> Result<TrainedModel, ApiError> {
        let http = self.request("POST", "train")?;
        self.read_json(http.send_json(request))
    }

    fn prediction_history(
        &self,
        model_id: ModelId,
        page: u32,
        per_page: u32,
    ) -> Result<PredictionHistoryPage, ApiError> {
        let page = page.max(1);
        let http = self
            .request("GET", &format!("predictions/{model_id}"))?
            .query("page", &page.to_string())
            .query("per_page", &per_page.max(1).to_string());
        let wire: HistoryWire = self.read_json(http.call())?;
        Ok(wire.into_page(page))
    }
}

pub(super) fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Json("Empty response body".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|err| ApiError::Json(format!("{err}: {}", snippet(trimmed))))
}

fn snippet(body: &str) -> &str {
    const MAX_CHARS: usize = 200;
    match body.char_indices().nth(MAX_CHARS) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

fn read_body_limited(response: ureq::Response, max_bytes: usize) -> Result<String, String> {
    let bytes = http_client::read_body(response, max_bytes as u64).map_err(|err| err.to_string())?;
    String::from_utf8(bytes).map_err(|err| err.to_string())
}
