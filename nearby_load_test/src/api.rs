use std::time::Duration;

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};

pub use reqwest::StatusCode;

/// JSON-over-HTTP access to the social graph service
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Couldn't build http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<ApiResponse> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {}", path))?;

        ApiResponse::read(response).await
    }

    pub async fn post_json<T>(&self, path: &str, body: &T) -> anyhow::Result<ApiResponse>
    where
        T: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", path))?;

        ApiResponse::read(response).await
    }
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    async fn read(response: reqwest::Response) -> anyhow::Result<Self> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Couldn't read response body")?
            .to_vec();

        Ok(Self { status, body })
    }

    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        ::serde_json::from_slice(&self.body).context("Couldn't parse response body")
    }
}
