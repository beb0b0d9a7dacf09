use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::navigator::Navigator;
use crate::token::TokenStore;

const USER_AGENT: &str = concat!("gradportrait/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the generation service.
///
/// Every request goes through [`ApiClient::send`], which attaches the bearer
/// token when one is stored and applies the one global rule: a 401 from any
/// endpoint clears the token and sends the user to the login entry point.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    /// Build a client with the configured timeout. Requests that exceed it
    /// fail with [`ClientError::Timeout`].
    pub fn new(
        config: &ClientConfig,
        tokens: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: config.api_url()?,
            tokens,
            navigator,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve an API path against the base URL. Leading slashes are ignored
    /// so `/users/me` and `users/me` both keep the base's path prefix.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::InvalidInput(format!("Bad API path '{}': {}", path, e)))
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.get()? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    pub(crate) async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.classify_failure(status, &body))
    }

    /// Turn a failed response into an error, running the session-wide
    /// side effects for 401.
    pub(crate) fn classify_failure(&self, status: StatusCode, body: &str) -> ClientError {
        if status == StatusCode::UNAUTHORIZED {
            warn!("Received 401 from backend, clearing session");
            if let Err(e) = self.tokens.clear() {
                warn!("Failed to clear token after 401: {}", e);
            }
            self.navigator.to_login();
            return ClientError::Unauthorized;
        }
        ClientError::from_status(status, body)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        Self::decode(response).await
    }

    pub(crate) async fn get_json_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let builder = self.request(Method::GET, path)?.query(query);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::POST, path)?.json(body);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    pub(crate) async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::PUT, path)?.json(body);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let builder = self.request(Method::POST, path)?.form(fields);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    pub(crate) async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, ClientError> {
        let builder = self.request(Method::POST, path)?.multipart(form);
        let response = self.send(builder).await?;
        Self::decode(response).await
    }

    pub(crate) async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
