use super::driver::{ApiFailure, UploadApi};
use crate::models::{
    credential::{UploadCredential, UploadSession},
    object::{CreateObjectRequest, ObjectListing},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, Url, header::CONTENT_TYPE};
use serde::{Deserialize, de::DeserializeOwned};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct ListBody {
    objects: Vec<ObjectListing>,
}

/// Talks to the broker's `/api/objects` endpoints and to the storage URLs it
/// hands out.
#[derive(Clone)]
pub struct HttpUploadApi {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpUploadApi {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid server URL")?;
        // Relative joins replace the last path segment unless it ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiFailure> {
        self.base_url
            .join(path)
            .map_err(|e| ApiFailure::Transport(format!("failed to build API URL: {e}")))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiFailure> {
        let response = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| ApiFailure::Transport(format!("unexpected response body: {e}")))
    }

    pub async fn list_objects(&self) -> Result<Vec<ObjectListing>> {
        let url = self.url("api/objects")?;
        let body: ListBody = self.send_json(self.http.get(url)).await?;
        Ok(body.objects)
    }
}

/// Prefer the `error` field of a JSON error body, fall back to the raw text.
fn rejected(status: reqwest::StatusCode, body: &str) -> ApiFailure {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => body.trim().to_string(),
    };
    ApiFailure::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn create_session(
        &self,
        request: &CreateObjectRequest,
    ) -> Result<UploadSession, ApiFailure> {
        let url = self.url("api/objects")?;
        self.send_json(self.http.post(url).json(request)).await
    }

    async fn put_object(
        &self,
        credential: &UploadCredential,
        mime_type: &str,
        body: Bytes,
    ) -> Result<(), ApiFailure> {
        let method = Method::from_bytes(credential.method.as_bytes())
            .map_err(|e| ApiFailure::Transport(format!("bad upload method: {e}")))?;
        let response = self
            .http
            .request(method, &credential.target_url)
            .bearer_auth(&credential.token)
            .header(CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejected(status, &body));
        }
        Ok(())
    }
}
