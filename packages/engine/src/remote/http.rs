//! HTTP 远端存储
//!
//! JSON 文档接口：
//! - `GET  /api/content/versions/{bundle_id}`
//! - `GET  /api/content/bundles/{bundle_id}`
//! - `GET  /api/students/{user_id}`
//! - `POST /api/sync/batch`
//!
//! 404 视为文档不存在；409/422 视为批量提交被拒绝。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use zhangwo_algo::SubjectBundle;

use super::{ContentVersionEntry, RemoteError, RemoteResult, RemoteStore, RemoteStudentSnapshot, WriteBatch};

/// 请求超时（秒）
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP 远端存储
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET 一个 JSON 文档，404 返回 None
    async fn get_document<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<Option<T>> {
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn version_entry(&self, bundle_id: &str) -> RemoteResult<Option<ContentVersionEntry>> {
        self.get_document(&format!("/api/content/versions/{bundle_id}"))
            .await
    }

    async fn fetch_bundle(&self, bundle_id: &str) -> RemoteResult<Option<SubjectBundle>> {
        self.get_document(&format!("/api/content/bundles/{bundle_id}"))
            .await
    }

    async fn fetch_student(&self, user_id: &str) -> RemoteResult<Option<RemoteStudentSnapshot>> {
        self.get_document(&format!("/api/students/{user_id}")).await
    }

    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()> {
        let writes = batch.len();
        let response = self
            .authorized(self.client.post(self.url("/api/sync/batch")))
            .json(&batch)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(writes, "batch committed");
            return Ok(());
        }

        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected(body));
        }

        Err(RemoteError::Status(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let store = HttpRemoteStore::new("https://api.example.com/", None).unwrap();
        assert_eq!(store.base_url(), "https://api.example.com");
        assert_eq!(
            store.url("/api/content/versions/fractions"),
            "https://api.example.com/api/content/versions/fractions"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let store = HttpRemoteStore::new("http://127.0.0.1:9", None).unwrap();
        let err = store.version_entry("fractions").await.unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
    }
}
