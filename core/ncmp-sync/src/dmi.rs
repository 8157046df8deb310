//! DMI plugin client.
//!
//! Data and model operations for a handle are sent to the plugin endpoint the
//! handle was registered through:
//!
//! - `POST {data}/dmi/v1/ch/{id}/data/ds/{datastore}?resourceIdentifier=..`
//! - `POST {model}/dmi/v1/ch/{id}/modules`
//!
//! Both carry the handle's DMI properties in the request body.

use crate::config::DmiClientConfig;
use async_trait::async_trait;
use ncmp_types::{CmHandle, CmHandleId, ModuleReference};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors talking to a DMI plugin.
#[derive(Debug, Error)]
pub enum DmiError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("plugin answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("plugin returned an empty body")]
    EmptyBody,

    #[error("invalid plugin response: {0}")]
    InvalidBody(String),

    #[error("no plugin endpoint registered for {0}")]
    MissingEndpoint(CmHandleId),
}

pub type DmiResult<T> = Result<T, DmiError>;

/// Datastores addressable through a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    PassthroughOperational,
    PassthroughRunning,
}

impl Datastore {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PassthroughOperational => "ncmp-datastore:passthrough-operational",
            Self::PassthroughRunning => "ncmp-datastore:passthrough-running",
        }
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write operations on the running datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOperation {
    Create,
    Update,
    Patch,
    Delete,
}

/// Raw plugin answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmiResponse {
    pub status: u16,
    pub body: String,
}

impl DmiResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body of a 2xx answer with content; anything else is a
    /// transport failure.
    pub fn into_success_body(self) -> DmiResult<String> {
        if !self.is_success() {
            return Err(DmiError::Status {
                status: self.status,
                body: self.body,
            });
        }
        if self.body.trim().is_empty() {
            return Err(DmiError::EmptyBody);
        }
        Ok(self.body)
    }
}

/// Device interface used by the core.
#[async_trait]
pub trait DmiClient: Send + Sync {
    /// Reads `resource_identifier` from `datastore`. Non-2xx answers are
    /// returned, not mapped to errors.
    async fn read(
        &self,
        handle: &CmHandle,
        resource_identifier: &str,
        datastore: Datastore,
    ) -> DmiResult<DmiResponse>;

    /// Writes to the running datastore.
    async fn write(
        &self,
        handle: &CmHandle,
        resource_identifier: &str,
        operation: DataOperation,
        payload: &str,
        content_type: &str,
    ) -> DmiResult<DmiResponse>;

    /// Fetches the YANG modules supported by the handle.
    async fn get_module_references(&self, handle: &CmHandle) -> DmiResult<Vec<ModuleReference>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataRequest<'a> {
    operation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a str>,
    cm_handle_properties: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModuleRequest<'a> {
    cm_handle_properties: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ModuleSchemas {
    #[serde(default)]
    schemas: Vec<ModuleSchema>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModuleSchema {
    module_name: String,
    #[serde(default)]
    revision: String,
}

/// [`DmiClient`] over HTTP.
pub struct HttpDmiClient {
    client: Client,
}

impl HttpDmiClient {
    pub fn new(config: &DmiClientConfig) -> DmiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| DmiError::Request(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn base_url<'a>(handle: &CmHandle, service: &'a str) -> DmiResult<&'a str> {
        let service = service.trim().trim_end_matches('/');
        if service.is_empty() {
            return Err(DmiError::MissingEndpoint(handle.id.clone()));
        }
        Ok(service)
    }

    fn data_url(handle: &CmHandle, datastore: Datastore) -> DmiResult<String> {
        let base = Self::base_url(handle, handle.plugins.data_service())?;
        Ok(format!("{base}/dmi/v1/ch/{}/data/ds/{datastore}", handle.id))
    }

    async fn post_data(
        &self,
        handle: &CmHandle,
        resource_identifier: &str,
        datastore: Datastore,
        request: &DataRequest<'_>,
    ) -> DmiResult<DmiResponse> {
        let url = Self::data_url(handle, datastore)?;
        debug!("DMI {} {} on {}", request.operation, resource_identifier, handle.id);

        let response = self
            .client
            .post(&url)
            .query(&[("resourceIdentifier", resource_identifier)])
            .json(request)
            .send()
            .await
            .map_err(|e| DmiError::Request(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DmiError::Request(format!("failed to read body from {url}: {e}")))?;
        Ok(DmiResponse { status, body })
    }
}

#[async_trait]
impl DmiClient for HttpDmiClient {
    async fn read(
        &self,
        handle: &CmHandle,
        resource_identifier: &str,
        datastore: Datastore,
    ) -> DmiResult<DmiResponse> {
        let request = DataRequest {
            operation: "read",
            data_type: None,
            data: None,
            cm_handle_properties: &handle.dmi_properties,
        };
        self.post_data(handle, resource_identifier, datastore, &request)
            .await
    }

    async fn write(
        &self,
        handle: &CmHandle,
        resource_identifier: &str,
        operation: DataOperation,
        payload: &str,
        content_type: &str,
    ) -> DmiResult<DmiResponse> {
        let operation = match operation {
            DataOperation::Create => "create",
            DataOperation::Update => "update",
            DataOperation::Patch => "patch",
            DataOperation::Delete => "delete",
        };
        let request = DataRequest {
            operation,
            data_type: Some(content_type),
            data: Some(payload),
            cm_handle_properties: &handle.dmi_properties,
        };
        self.post_data(
            handle,
            resource_identifier,
            Datastore::PassthroughRunning,
            &request,
        )
        .await
    }

    async fn get_module_references(&self, handle: &CmHandle) -> DmiResult<Vec<ModuleReference>> {
        let base = Self::base_url(handle, handle.plugins.model_service())?;
        let url = format!("{base}/dmi/v1/ch/{}/modules", handle.id);

        let response = self
            .client
            .post(&url)
            .json(&ModuleRequest {
                cm_handle_properties: &handle.dmi_properties,
            })
            .send()
            .await
            .map_err(|e| DmiError::Request(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DmiError::Request(format!("failed to read body from {url}: {e}")))?;
        let body = DmiResponse { status, body }.into_success_body()?;

        let schemas: ModuleSchemas =
            serde_json::from_str(&body).map_err(|e| DmiError::InvalidBody(e.to_string()))?;
        Ok(schemas
            .schemas
            .into_iter()
            .map(|s| ModuleReference {
                module_name: s.module_name,
                revision: s.revision,
            })
            .collect())
    }
}
