//! Minimal JSON API client shared by the backend adapters.

use reqwest::{Client, Response, StatusCode};
use sandbox_agents_core::ProviderError;
use serde::{Serialize, de::DeserializeOwned};

fn transport(e: reqwest::Error) -> ProviderError {
    ProviderError::Transport(e.to_string())
}

/// Percent-encode the characters that matter in a path query parameter.
pub(crate) fn urlencode(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Authenticated JSON client rooted at one API base URL.
#[derive(Clone)]
pub(crate) struct ApiClient {
    http: Client,
    base: String,
    api_key: String,
}

impl ApiClient {
    pub(crate) fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base: base.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Transport(format!("{status}: {body}")))
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }

    pub(crate) async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(transport)
    }

    /// POST where the response body is irrelevant.
    pub(crate) async fn post_unit<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await.map(drop)
    }

    /// POST raw bytes (file upload).
    pub(crate) async fn post_bytes(
        &self,
        path: &str,
        contents: Vec<u8>,
    ) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .body(contents)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await.map(drop)
    }

    pub(crate) async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        Ok(Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(transport)?
            .to_vec())
    }

    /// GET returning `false` on 404 instead of an error.
    pub(crate) async fn head_exists(&self, path: &str) -> Result<bool, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await.map(|_| true)
    }

    /// DELETE; 404 is treated as already gone.
    pub(crate) async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await.map(drop)
    }

    /// POST returning the raw streaming response, for NDJSON event streams.
    pub(crate) async fn post_stream<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await
    }

    /// GET returning the raw streaming response.
    pub(crate) async fn get_stream(&self, path: &str) -> Result<Response, ProviderError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await
    }
}
