//! Registry REST client.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::types::DeviceIdentity;
use crate::auth::SasToken;
use crate::error::RegistryError;

/// Service API version used for registry calls
pub const REGISTRY_API_VERSION: &str = "2021-04-12";

/// Client for the device registry of one hub.
///
/// The hub is taken from the service token.
pub struct RegistryClient {
    http: Client,
    host: String,
    base_url: String,
    token: SasToken,
}

impl RegistryClient {
    pub fn new(token: SasToken, timeout: Duration) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Request(format!("HTTP client error: {}", e)))?;

        let host = token.host().to_string();
        Ok(Self {
            http,
            base_url: format!("https://{}", host),
            host,
            token,
        })
    }

    /// Send requests to `base_url` instead of `https://<hub host>`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.http
            .request(method, url)
            .query(&[("api-version", REGISTRY_API_VERSION)])
            .header(reqwest::header::AUTHORIZATION, self.token.to_string())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RegistryError> {
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Request(format!("request to {} failed: {}", self.host, e)))?;

        tracing::debug!(status = %response.status(), url = %response.url(), "registry response");
        Ok(response)
    }

    /// Fetch one device identity.
    pub async fn get_device(&self, device_id: &str) -> Result<DeviceIdentity, RegistryError> {
        let response = self
            .send(self.request(Method::GET, &device_path(device_id)))
            .await?;
        parse_json(check_status(response, device_id).await?).await
    }

    /// List up to `top` device identities.
    pub async fn list_devices(&self, top: usize) -> Result<Vec<DeviceIdentity>, RegistryError> {
        let request = self
            .request(Method::GET, "devices")
            .query(&[("top", top.to_string())]);
        let response = self.send(request).await?;
        parse_json(check_status(response, "devices").await?).await
    }

    /// Register a new device identity and return it as stored by the service.
    pub async fn create_device(
        &self,
        device: &DeviceIdentity,
    ) -> Result<DeviceIdentity, RegistryError> {
        let request = self
            .request(Method::PUT, &device_path(&device.device_id))
            .json(device);
        let response = self.send(request).await?;
        parse_json(check_status(response, &device.device_id).await?).await
    }

    /// Delete a device identity regardless of its etag.
    pub async fn delete_device(&self, device_id: &str) -> Result<(), RegistryError> {
        let request = self
            .request(Method::DELETE, &device_path(device_id))
            .header(reqwest::header::IF_MATCH, "*");
        let response = self.send(request).await?;
        check_status(response, device_id).await?;
        Ok(())
    }
}

fn device_path(device_id: &str) -> String {
    format!("devices/{}", urlencoding::encode(device_id))
}

async fn check_status(response: Response, subject: &str) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        return Err(RegistryError::NotFound(subject.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Status {
        status: status.as_u16(),
        message: service_message(&body),
    })
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, RegistryError> {
    let body = response
        .text()
        .await
        .map_err(|e| RegistryError::Request(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| RegistryError::InvalidResponse(e.to_string()))
}

/// Pull the human-readable part out of a service error body.
///
/// Error bodies look like `{"Message":"ErrorCode:...;details","ExceptionMessage":"..."}`;
/// anything else is returned as-is.
fn service_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("Message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
