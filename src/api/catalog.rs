//! Catalog and account endpoints used by the CLI.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::multipart::MultipartBody;
use super::wire::LoginWire;
use super::{ApiError, Dataset, DatasetId, DatasetUploaded, HttpGateway, Model, ModelId};
use crate::http_client::{self, RetryConfig};

/// Upper bound for exported model files.
const MAX_EXPORT_BYTES: u64 = 512 * 1024 * 1024;

impl HttpGateway {
    /// Models owned by the current user.
    pub fn list_models(&self) -> Result<Vec<Model>, ApiError> {
        self.get_json_retrying("models")
    }

    /// Datasets owned by the current user.
    pub fn list_datasets(&self) -> Result<Vec<Dataset>, ApiError> {
        self.get_json_retrying("datasets")
    }

    /// Account details of the current user.
    pub fn profile(&self) -> Result<Value, ApiError> {
        self.get_json_retrying("profile")
    }

    /// Upload a CSV file as a new dataset.
    pub fn upload_dataset(
        &self,
        path: &Path,
        name: &str,
        description: Option<&str>,
    ) -> Result<DatasetUploaded, ApiError> {
        let bytes = fs::read(path)
            .map_err(|err| ApiError::Io(format!("Failed to read {}: {err}", path.display())))?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("dataset.csv");
        let mut body = MultipartBody::new();
        body.text("name", name);
        if let Some(description) = description {
            body.text("description", description);
        }
        body.file("file", filename, "text/csv", &bytes);
        let content_type = body.content_type();
        let request = self
            .request("POST", "dataset")?
            .set("Content-Type", &content_type);
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Uploading dataset");
        self.read_json(request.send_bytes(&body.finish()))
    }

    /// Rename or re-describe a dataset. Fields left as `None` are unchanged.
    pub fn update_dataset(
        &self,
        dataset_id: DatasetId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut fields = Vec::new();
        if let Some(name) = name {
            fields.push(("name", name));
        }
        if let Some(description) = description {
            fields.push(("description", description));
        }
        let request = self.request("PUT", &format!("update_dataset/{dataset_id}"))?;
        self.read_json(request.send_form(&fields))
    }

    pub fn delete_dataset(&self, dataset_id: DatasetId) -> Result<(), ApiError> {
        let request = self.request("DELETE", &format!("delete_dataset/{dataset_id}"))?;
        self.read_text(request.call()).map(|_| ())
    }

    /// Stream the serialized model into `writer`, returning its size in bytes.
    pub fn export_model(&self, model_id: ModelId, writer: &mut impl Write) -> Result<u64, ApiError> {
        let request = self
            .request("GET", &format!("export_model/{model_id}"))?
            .set("Accept", "application/octet-stream");
        let response = self.check_status(request.call())?;
        http_client::stream_body(response, writer, MAX_EXPORT_BYTES)
            .map_err(|err| ApiError::Io(err.to_string()))
    }

    pub fn delete_account(&self) -> Result<(), ApiError> {
        let request = self.request("DELETE", "delete_account")?;
        self.read_text(request.call()).map(|_| ())
    }

    /// Exchange credentials for an access token.
    pub fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let request = self.request("POST", "login")?;
        let wire: LoginWire = self.read_json(request.send_json(json!({
            "username": username,
            "password": password,
        })))?;
        Ok(wire.access_token)
    }

    pub fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut body = json!({
            "username": username,
            "password": password,
        });
        if let Some(email) = email {
            body["email"] = Value::from(email);
        }
        let request = self.request("POST", "register")?;
        self.read_text(request.send_json(body)).map(|_| ())
    }

    fn get_json_retrying<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        http_client::retry_with_backoff(
            &format!("GET {path}"),
            RetryConfig::CATALOG_READS,
            || self.get_json(path),
            ApiError::is_transient,
        )
    }
}
