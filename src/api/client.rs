//! HTTP client for the assistant backend REST API.

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::types::{AccessToken, AssistantRecord, ErrorBody, RegisterRequest, ThreadRecord, UserRead};

/// Page size used by [`ThreadsApi::list`].
pub const DEFAULT_THREAD_LIMIT: u32 = 10;

/// HTTP client for the API.
///
/// # Example
///
/// ```rust,no_run
/// use assistant_stream_client::api::ApiClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ApiClient::new("http://localhost:8000")?;
///
/// let token = client.auth().login("me@example.com", "hunter2").await?;
/// let threads = client.threads().list(&token.access_token).await?;
/// let assistants = client.assistants().list(&token.access_token).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the backend (e.g., "http://localhost:8000")
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a new client with a custom reqwest client.
    pub fn with_client(base_url: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        let mut base_url = Url::parse(base_url.as_ref())?;
        // Relative joins keep a path prefix only when the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url, http })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the Auth API.
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi { client: self }
    }

    /// Access the Threads API.
    pub fn threads(&self) -> ThreadsApi<'_> {
        ThreadsApi { client: self }
    }

    /// Access the Assistants API.
    pub fn assistants(&self) -> AssistantsApi<'_> {
        AssistantsApi { client: self }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map_or(body, |parsed| parsed.message());
            debug!(name: "api.error", status = status.as_u16(), message = %message, "API request failed");
            Err(Error::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

// =============================================================================
// Auth API
// =============================================================================

/// Auth API client.
#[derive(Debug)]
pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl AuthApi<'_> {
    /// Create an account.
    pub async fn register(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<UserRead> {
        let req = RegisterRequest {
            email: email.into(),
            password: password.into(),
        };
        let response = self
            .client
            .http
            .post(self.client.url("api/auth/register")?)
            .json(&req)
            .send()
            .await?;
        ApiClient::handle_response(response).await
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<AccessToken> {
        let response = self
            .client
            .http
            .post(self.client.url("api/auth/jwt/login")?)
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;
        ApiClient::handle_response(response).await
    }

    /// The account the token belongs to.
    pub async fn me(&self, token: &str) -> Result<UserRead> {
        let response = self
            .client
            .http
            .get(self.client.url("api/users/me")?)
            .bearer_auth(token)
            .send()
            .await?;
        ApiClient::handle_response(response).await
    }
}

// =============================================================================
// Threads API
// =============================================================================

/// Threads API client.
#[derive(Debug)]
pub struct ThreadsApi<'a> {
    client: &'a ApiClient,
}

impl ThreadsApi<'_> {
    /// First page of threads.
    pub async fn list(&self, token: &str) -> Result<Vec<ThreadRecord>> {
        self.list_page(token, DEFAULT_THREAD_LIMIT, 0).await
    }

    /// One page of threads.
    pub async fn list_page(&self, token: &str, limit: u32, offset: u32) -> Result<Vec<ThreadRecord>> {
        let response = self
            .client
            .http
            .get(self.client.url("api/threads/")?)
            .query(&[
                ("token", token.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;
        ApiClient::handle_response(response).await
    }

    /// Create a new thread.
    pub async fn create(&self, token: &str) -> Result<ThreadRecord> {
        let response = self
            .client
            .http
            .post(self.client.url("api/threads/")?)
            .query(&[("token", token)])
            .send()
            .await?;
        ApiClient::handle_response(response).await
    }
}

// =============================================================================
// Assistants API
// =============================================================================

/// Assistants API client.
#[derive(Debug)]
pub struct AssistantsApi<'a> {
    client: &'a ApiClient,
}

impl AssistantsApi<'_> {
    /// All assistants available to the user.
    pub async fn list(&self, token: &str) -> Result<Vec<AssistantRecord>> {
        let response = self
            .client
            .http
            .get(self.client.url("api/assistants/")?)
            .query(&[("token", token)])
            .send()
            .await?;
        ApiClient::handle_response(response).await
    }
}
