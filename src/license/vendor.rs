//! License vendor API client.
//!
//! The vendor speaks a Lemon Squeezy style license API: `validate` and
//! `activate` take a license key, and orders are looked up with a bearer key.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("Vendor request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Vendor returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Vendor API key is not configured")]
    MissingApiKey,
    #[error("Vendor response missing {0}")]
    Incomplete(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorLicenseKey {
    pub status: String,
    #[serde(default)]
    pub key: Option<String>,
    /// RFC 3339 timestamp, absent for lifetime licenses.
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorMeta {
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorInstance {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub license_key: Option<VendorLicenseKey>,
    #[serde(default)]
    pub meta: Option<VendorMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivateResponse {
    pub activated: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub license_key: Option<VendorLicenseKey>,
    #[serde(default)]
    pub instance: Option<VendorInstance>,
    #[serde(default)]
    pub meta: Option<VendorMeta>,
}

/// The license vendor as seen by the activation gateway.
#[async_trait]
pub trait LicenseVendor: Send + Sync {
    async fn validate(&self, license_key: &str) -> Result<ValidateResponse, VendorError>;

    async fn activate(
        &self,
        license_key: &str,
        instance_name: &str,
    ) -> Result<ActivateResponse, VendorError>;

    /// Order total in cents.
    async fn order_total(&self, order_id: i64) -> Result<i64, VendorError>;
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    license_key: &'a str,
}

#[derive(Serialize)]
struct ActivateRequest<'a> {
    license_key: &'a str,
    instance_name: &'a str,
}

#[derive(Deserialize)]
struct OrderResponse {
    data: OrderData,
}

#[derive(Deserialize)]
struct OrderData {
    attributes: OrderAttributes,
}

#[derive(Deserialize)]
struct OrderAttributes {
    total: i64,
}

/// HTTP implementation of [`LicenseVendor`].
pub struct HttpLicenseVendor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLicenseVendor {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, VendorError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Read a vendor response. The license endpoints answer business
    /// rejections with a 4xx and the usual JSON body, so those are decoded too.
    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, VendorError> {
        let status = response.status();
        if status.is_server_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(VendorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| VendorError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

#[async_trait]
impl LicenseVendor for HttpLicenseVendor {
    async fn validate(&self, license_key: &str) -> Result<ValidateResponse, VendorError> {
        let response = self
            .client
            .post(format!("{}/v1/licenses/validate", self.base_url))
            .header("Accept", "application/json")
            .json(&ValidateRequest { license_key })
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn activate(
        &self,
        license_key: &str,
        instance_name: &str,
    ) -> Result<ActivateResponse, VendorError> {
        let response = self
            .client
            .post(format!("{}/v1/licenses/activate", self.base_url))
            .header("Accept", "application/json")
            .json(&ActivateRequest {
                license_key,
                instance_name,
            })
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn order_total(&self, order_id: i64) -> Result<i64, VendorError> {
        let api_key = self.api_key.as_deref().ok_or(VendorError::MissingApiKey)?;

        let response = self
            .client
            .get(format!("{}/v1/orders/{}", self.base_url, order_id))
            .header("Accept", "application/vnd.api+json")
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(VendorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let order: OrderResponse = response.json().await?;
        Ok(order.data.attributes.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_response_decodes() {
        let body = r#"{
            "activated": true,
            "error": null,
            "license_key": {
                "id": 1,
                "status": "active",
                "key": "38b1460a-5104-4067-a91d-77b872934d51",
                "activation_limit": 1,
                "activation_usage": 1,
                "created_at": "2024-01-10T12:00:00.000000Z",
                "expires_at": null
            },
            "instance": {
                "id": "47596ad9-a811-4ebf-ac8a-03fc7b6d2a17",
                "name": "assetgate-user-1",
                "created_at": "2024-01-15T12:30:45.000000Z"
            },
            "meta": {
                "store_id": 1,
                "order_id": 2,
                "product_name": "Assets",
                "variant_name": "Pro Lifetime",
                "customer_email": "alice@example.com"
            }
        }"#;

        let response: ActivateResponse = serde_json::from_str(body).unwrap();
        assert!(response.activated);
        assert_eq!(response.instance.unwrap().name, "assetgate-user-1");
        let meta = response.meta.unwrap();
        assert_eq!(meta.order_id, Some(2));
        assert_eq!(meta.variant_name.as_deref(), Some("Pro Lifetime"));
        assert!(response.license_key.unwrap().expires_at.is_none());
    }

    #[test]
    fn test_invalid_validate_response_decodes() {
        let body = r#"{"valid": false, "error": "license_key not found.", "license_key": null, "meta": null}"#;
        let response: ValidateResponse = serde_json::from_str(body).unwrap();
        assert!(!response.valid);
        assert_eq!(response.error.as_deref(), Some("license_key not found."));
        assert!(response.meta.is_none());
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let vendor = HttpLicenseVendor::new("https://api.example.com/", None).unwrap();
        assert_eq!(vendor.base_url, "https://api.example.com");
    }

    #[tokio::test]
    async fn test_order_total_requires_api_key() {
        let vendor = HttpLicenseVendor::new("http://127.0.0.1:9", None).unwrap();
        assert!(matches!(
            vendor.order_total(1).await,
            Err(VendorError::MissingApiKey)
        ));
    }
}
