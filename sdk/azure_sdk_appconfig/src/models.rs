//! Wire types for the App Configuration data plane.

use std::collections::HashMap;

use azure_sdk_core::ETag;
use serde::{Deserialize, Serialize};

/// Data-plane API version sent on every request.
pub const API_VERSION: &str = "2023-10-01";

pub(crate) const KV_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.kv+json";
pub(crate) const SNAPSHOT_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.snapshot+json";

/// A configuration setting (key-value).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(default, skip_serializing)]
    pub etag: Option<ETag>,
    #[serde(default, skip_serializing)]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing)]
    pub locked: Option<bool>,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.locked.unwrap_or(false)
    }
}

/// Selects the settings captured by a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingFilter {
    /// Key filter; `*` wildcards and comma separated alternatives are allowed.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SettingFilter {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// How a snapshot resolves settings that share a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionType {
    /// One setting per key; later filters win.
    #[default]
    Key,
    /// One setting per key and label.
    KeyLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Provisioning,
    Ready,
    Archived,
    Failed,
    #[serde(other)]
    Unknown,
}

/// A point-in-time, immutable set of settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default)]
    pub filters: Vec<SettingFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_type: Option<CompositionType>,
    /// Seconds an archived snapshot is kept before deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(default, skip_serializing)]
    pub status: Option<SnapshotStatus>,
    #[serde(default, skip_serializing)]
    pub created: Option<String>,
    #[serde(default, skip_serializing)]
    pub expires: Option<String>,
    #[serde(default, skip_serializing)]
    pub size: Option<u64>,
    #[serde(default, skip_serializing)]
    pub items_count: Option<u64>,
    #[serde(default, skip_serializing)]
    pub etag: Option<ETag>,
}

impl Snapshot {
    /// A snapshot definition over `filters`. An empty list selects every setting.
    pub fn new(filters: Vec<SettingFilter>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn with_composition_type(mut self, composition_type: CompositionType) -> Self {
        self.composition_type = Some(composition_type);
        self
    }

    pub fn with_retention_period(mut self, seconds: u64) -> Self {
        self.retention_period = Some(seconds);
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }
}

/// Body of a snapshot status update (archive or recover).
#[derive(Debug, Serialize)]
pub(crate) struct SnapshotUpdate {
    pub status: SnapshotStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setting_deserializes_service_payload() {
        let setting: Setting = serde_json::from_value(json!({
            "etag": "\"abc\"",
            "key": "color",
            "label": "prod",
            "content_type": null,
            "value": "blue",
            "tags": {"team": "web"},
            "locked": true,
            "last_modified": "2023-10-01T00:00:00+00:00"
        }))
        .unwrap();

        assert_eq!(setting.key, "color");
        assert_eq!(setting.label.as_deref(), Some("prod"));
        assert_eq!(setting.etag, Some(ETag::from("\"abc\"")));
        assert!(setting.is_read_only());
        assert_eq!(setting.tags["team"], "web");
    }

    #[test]
    fn setting_serializes_only_writable_fields() {
        let mut setting = Setting::new("color", "blue").with_tag("team", "web");
        setting.etag = Some(ETag::from("\"abc\""));
        setting.locked = Some(true);

        let value = serde_json::to_value(&setting).unwrap();
        assert_eq!(value, json!({"key": "color", "value": "blue", "tags": {"team": "web"}}));
    }

    #[test]
    fn snapshot_status_tolerates_unknown_values() {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "name": "release",
            "status": "deleting",
            "filters": [{"key": "app/*"}],
            "composition_type": "key_label"
        }))
        .unwrap();

        assert_eq!(snapshot.status, Some(SnapshotStatus::Unknown));
        assert_eq!(snapshot.composition_type, Some(CompositionType::KeyLabel));
        assert_eq!(snapshot.filters, vec![SettingFilter::key("app/*")]);
    }
}
