use std::fmt;

use url::Url;

use super::ApiError;

/// Environment variable the CLI reads the bearer token from.
pub const TOKEN_ENV: &str = "MODELDESK_TOKEN";

/// Explicit request context handed to a gateway at construction.
///
/// Holds the service base URL and an opaque bearer token. Token lifecycle
/// (login, refresh, storage) belongs to whoever builds the context.
#[derive(Clone)]
pub struct ApiContext {
    base_url: Url,
    token: Option<String>,
}

impl ApiContext {
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            token: None,
        }
    }

    /// Attach a bearer token; blank tokens are ignored.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim();
        self.token = (!token.is_empty()).then(|| token.to_string());
        self
    }

    /// Attach the token from [`TOKEN_ENV`] when it is set.
    pub fn with_env_token(self) -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) => self.with_token(token),
            Err(_) => self,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Resolve an endpoint path (without leading slash) against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::Transport(format!("Invalid endpoint {path}: {err}")))
    }

    pub(crate) fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {token}"))
    }
}

impl fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiContext")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
