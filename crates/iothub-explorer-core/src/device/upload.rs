//! File upload to the hub's linked storage account.
//!
//! Three steps, the same for every device transport:
//! 1. ask the hub for a blob SAS URI (`POST devices/<id>/files`)
//! 2. `PUT` the bytes to that URI as a block blob
//! 3. report the outcome (`POST devices/<id>/files/notifications`)

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::client::{DeviceAuth, DEVICE_API_VERSION};
use crate::error::DeviceError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobSasUri {
    correlation_id: String,
    host_name: String,
    container_name: String,
    blob_name: String,
    sas_token: String,
}

impl BlobSasUri {
    fn url(&self, scheme: &str) -> String {
        let blob_path = self
            .blob_name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}://{}/{}/{}{}",
            scheme,
            self.host_name, self.container_name, blob_path, self.sas_token
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadNotification<'a> {
    correlation_id: &'a str,
    is_success: bool,
    status_code: u16,
    status_description: String,
}

/// Uploads files on behalf of one device.
#[derive(Debug, Clone)]
pub struct FileUploadClient {
    http: Client,
    auth: DeviceAuth,
}

impl FileUploadClient {
    pub fn new(auth: DeviceAuth, timeout: Duration) -> Result<Self, DeviceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::ConnectFailed {
                host: auth.host_name.clone(),
                message: format!("HTTP client error: {}", e),
            })?;

        Ok(Self { http, auth })
    }

    pub async fn upload(&self, blob_name: &str, data: Vec<u8>) -> Result<(), DeviceError> {
        let failed = |message: String| DeviceError::UploadFailed {
            file: blob_name.to_string(),
            message,
        };

        let sas = self.request_sas_uri(blob_name).await.map_err(failed)?;
        tracing::debug!(container = %sas.container_name, blob = %sas.blob_name, "uploading blob");

        let outcome = self
            .http
            .put(sas.url(self.auth.scheme()))
            .header("x-ms-blob-type", "BlockBlob")
            .body(data)
            .send()
            .await;

        let (status_code, result) = match outcome {
            Ok(response) if response.status().is_success() => (response.status().as_u16(), Ok(())),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let message = match body.trim() {
                    "" => format!("storage returned HTTP {}", status),
                    body => format!("storage returned HTTP {}: {}", status, body),
                };
                (status.as_u16(), Err(message))
            }
            Err(e) => (500, Err(format!("storage request failed: {}", e))),
        };

        let description = match &result {
            Ok(()) => "Upload succeeded".to_string(),
            Err(message) => message.clone(),
        };
        self.notify(&sas.correlation_id, result.is_ok(), status_code, description)
            .await
            .map_err(failed)?;

        result.map_err(failed)
    }

    async fn request_sas_uri(&self, blob_name: &str) -> Result<BlobSasUri, String> {
        let token = self.auth.token().map_err(|e| e.to_string())?;
        let response = self
            .http
            .post(self.auth.device_url("files"))
            .query(&[("api-version", DEVICE_API_VERSION)])
            .header(reqwest::header::AUTHORIZATION, token.to_string())
            .json(&serde_json::json!({ "blobName": blob_name }))
            .send()
            .await
            .map_err(|e| format!("hub request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("hub returned HTTP {}: {}", status, body.trim()));
        }

        response
            .json::<BlobSasUri>()
            .await
            .map_err(|e| format!("invalid upload URI response: {}", e))
    }

    async fn notify(
        &self,
        correlation_id: &str,
        is_success: bool,
        status_code: u16,
        status_description: String,
    ) -> Result<(), String> {
        let token = self.auth.token().map_err(|e| e.to_string())?;
        let notification = UploadNotification {
            correlation_id,
            is_success,
            status_code,
            status_description,
        };

        let response = self
            .http
            .post(self.auth.device_url("files/notifications"))
            .query(&[("api-version", DEVICE_API_VERSION)])
            .header(reqwest::header::AUTHORIZATION, token.to_string())
            .json(&notification)
            .send()
            .await
            .map_err(|e| format!("upload notification failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "upload notification returned HTTP {}",
                response.status()
            ));
        }

        Ok(())
    }
}
