//! Plugin registration requests and responses.

use crate::{CmHandleId, DmiPluginRefs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A handle as supplied by a registering plugin.
///
/// In `updated_cm_handles`, a property mapped to `None` is removed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NcmpServiceCmHandle {
    pub cm_handle_id: String,
    #[serde(default)]
    pub dmi_properties: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub public_properties: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub data_sync_enabled: Option<bool>,
    #[serde(default)]
    pub module_set_tag: Option<String>,
}

impl NcmpServiceCmHandle {
    #[must_use]
    pub fn new(cm_handle_id: impl Into<String>) -> Self {
        Self {
            cm_handle_id: cm_handle_id.into(),
            ..Default::default()
        }
    }
}

/// A registration delta sent by a DMI plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DmiPluginRegistration {
    #[serde(default)]
    pub dmi_plugin: String,
    #[serde(default)]
    pub dmi_data_plugin: String,
    #[serde(default)]
    pub dmi_model_plugin: String,
    #[serde(default)]
    pub created_cm_handles: Vec<NcmpServiceCmHandle>,
    #[serde(default)]
    pub updated_cm_handles: Vec<NcmpServiceCmHandle>,
    #[serde(default)]
    pub removed_cm_handles: Vec<String>,
}

impl DmiPluginRegistration {
    #[must_use]
    pub fn plugin_refs(&self) -> DmiPluginRefs {
        DmiPluginRefs {
            dmi_service_name: self.dmi_plugin.clone(),
            dmi_data_service_name: self.dmi_data_plugin.clone(),
            dmi_model_service_name: self.dmi_model_plugin.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Success,
    Failure,
}

/// Failure classification of a single handle in a registration response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationError {
    UnknownError,
    CmHandleAlreadyExist,
    CmHandleDoesNotExist,
    CmHandleInvalidId,
}

impl RegistrationError {
    /// Stable error code exposed to callers.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnknownError => "00",
            Self::CmHandleAlreadyExist => "01",
            Self::CmHandleDoesNotExist => "02",
            Self::CmHandleInvalidId => "03",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error",
            Self::CmHandleAlreadyExist => "cm-handle already exists",
            Self::CmHandleDoesNotExist => "cm-handle does not exist",
            Self::CmHandleInvalidId => "cm-handle has an invalid character(s) in id",
        }
    }
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Outcome of registering, updating or removing one handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmHandleRegistrationResponse {
    pub cm_handle_id: CmHandleId,
    pub status: RegistrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_error: Option<RegistrationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl CmHandleRegistrationResponse {
    #[must_use]
    pub fn success(cm_handle_id: CmHandleId) -> Self {
        Self {
            cm_handle_id,
            status: RegistrationStatus::Success,
            registration_error: None,
            error_text: None,
        }
    }

    #[must_use]
    pub fn failure(cm_handle_id: CmHandleId, error: RegistrationError) -> Self {
        Self {
            cm_handle_id,
            status: RegistrationStatus::Failure,
            registration_error: Some(error),
            error_text: Some(error.message().to_string()),
        }
    }

    /// An unclassified failure carrying the underlying error text.
    #[must_use]
    pub fn unknown_failure(cm_handle_id: CmHandleId, error_text: impl Into<String>) -> Self {
        Self {
            cm_handle_id,
            status: RegistrationStatus::Failure,
            registration_error: Some(RegistrationError::UnknownError),
            error_text: Some(error_text.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RegistrationStatus::Success
    }
}

/// Per-handle results of one registration request, grouped by operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DmiPluginRegistrationResponse {
    pub created_cm_handles: Vec<CmHandleRegistrationResponse>,
    pub updated_cm_handles: Vec<CmHandleRegistrationResponse>,
    pub removed_cm_handles: Vec<CmHandleRegistrationResponse>,
}
