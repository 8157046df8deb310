//! The CM handle record.

use crate::{CmHandleId, CompositeState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Plugin endpoints a handle was registered through.
///
/// Either `dmi_service_name` is set, or both the data and model service
/// names are. Validation of that rule happens at registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DmiPluginRefs {
    #[serde(default)]
    pub dmi_service_name: String,
    #[serde(default)]
    pub dmi_data_service_name: String,
    #[serde(default)]
    pub dmi_model_service_name: String,
}

impl DmiPluginRefs {
    /// Endpoint serving data operations.
    #[must_use]
    pub fn data_service(&self) -> &str {
        if self.dmi_data_service_name.trim().is_empty() {
            &self.dmi_service_name
        } else {
            &self.dmi_data_service_name
        }
    }

    /// Endpoint serving model (module) operations.
    #[must_use]
    pub fn model_service(&self) -> &str {
        if self.dmi_model_service_name.trim().is_empty() {
            &self.dmi_service_name
        } else {
            &self.dmi_model_service_name
        }
    }
}

/// A YANG module reported by a handle's model plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleReference {
    pub module_name: String,
    pub revision: String,
}

/// A managed proxy for one externally owned network element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmHandle {
    pub id: CmHandleId,
    pub plugins: DmiPluginRefs,
    #[serde(default)]
    pub dmi_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub public_properties: BTreeMap<String, String>,
    pub composite_state: CompositeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_set_tag: Option<String>,
}

impl CmHandle {
    /// Creates a handle in ADVISED state with no properties.
    #[must_use]
    pub fn advised(id: CmHandleId, plugins: DmiPluginRefs) -> Self {
        Self {
            id,
            plugins,
            dmi_properties: BTreeMap::new(),
            public_properties: BTreeMap::new(),
            composite_state: CompositeState::advised(),
            module_set_tag: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> crate::CmHandleState {
        self.composite_state.cm_handle_state
    }
}
