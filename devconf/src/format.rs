//! Dynamic value lists for schema `format` tags.
//!
//! A schema property may carry a `format` naming another part of the
//! configuration (an AE title, a queue, a device ...). The registry turns
//! such a tag into the list of values the field may pick from, either by
//! reading a fixed path of the device document or by asking an external
//! [`ListProvider`].

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::{
    error::LookupError,
    path::{get_path, substitute_placeholders},
};

/// Format tags with special meaning to the form compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// AE title of this archive device, read from its own network AEs.
    ArchiveAeTitle,
    QueueName,
    ExporterId,
    StorageId,
    QueryRetrieveViewId,
    KeycloakServerId,
    BulkDataDescriptorId,
    /// Any AE title known to the configuration.
    AeTitle,
    DeviceName,
    Hl7ApplicationName,
    WebApp,
    /// Default UI language, chosen from the device's language list.
    DefaultLanguage,
}

impl FormatTag {
    /// Map a schema `format` string to a tag; ordinary formats yield `None`.
    pub fn parse(format: &str) -> Option<Self> {
        let tag = match format {
            "dcmArchiveAETitle" => Self::ArchiveAeTitle,
            "dcmQueueName" => Self::QueueName,
            "dcmExporterID" => Self::ExporterId,
            "dcmStorageID" => Self::StorageId,
            "dcmQueryRetrieveViewID" => Self::QueryRetrieveViewId,
            "dcmKeycloakServerID" => Self::KeycloakServerId,
            "dcmBulkDataDescriptorID" => Self::BulkDataDescriptorId,
            "dcmAETitle" => Self::AeTitle,
            "dicomDeviceName" => Self::DeviceName,
            "hl7ApplicationName" => Self::Hl7ApplicationName,
            "webApp" => Self::WebApp,
            "dcmDefaultLanguage" => Self::DefaultLanguage,
            _ => return None,
        };
        Some(tag)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ArchiveAeTitle => "dcmArchiveAETitle",
            Self::QueueName => "dcmQueueName",
            Self::ExporterId => "dcmExporterID",
            Self::StorageId => "dcmStorageID",
            Self::QueryRetrieveViewId => "dcmQueryRetrieveViewID",
            Self::KeycloakServerId => "dcmKeycloakServerID",
            Self::BulkDataDescriptorId => "dcmBulkDataDescriptorID",
            Self::AeTitle => "dcmAETitle",
            Self::DeviceName => "dicomDeviceName",
            Self::Hl7ApplicationName => "hl7ApplicationName",
            Self::WebApp => "webApp",
            Self::DefaultLanguage => "dcmDefaultLanguage",
        }
    }

    /// Tags rendered as a "pick existing or type new" control.
    pub fn is_cross_reference(self) -> bool {
        matches!(
            self,
            Self::AeTitle | Self::DeviceName | Self::Hl7ApplicationName | Self::WebApp
        )
    }

    /// Lookup definition, or `None` when the tag has no dynamic value list.
    pub fn formatter(self) -> Option<Formatter> {
        let device = |path, key, label, message| Formatter {
            key,
            label,
            message,
            source: FormatSource::Device {
                path,
                transform: Transform::None,
            },
        };
        let provider = |key, label, message| Formatter {
            key,
            label,
            message,
            source: FormatSource::Provider,
        };
        let formatter = match self {
            Self::ArchiveAeTitle => Formatter {
                key: "dicomAETitle",
                label: "{dicomAETitle}",
                message: "Create first an AE Title!",
                source: FormatSource::Device {
                    path: "dicomNetworkAE",
                    transform: Transform::MergeAliases,
                },
            },
            Self::QueueName => device(
                "dcmDevice.dcmArchiveDevice.dcmQueue",
                "dcmQueueName",
                "{dcmQueueName}",
                "Create first a Queue!",
            ),
            Self::ExporterId => device(
                "dcmDevice.dcmArchiveDevice.dcmExporter",
                "dcmExporterID",
                "{dcmExporterID}",
                "Create first an Exporter!",
            ),
            Self::StorageId => device(
                "dcmDevice.dcmArchiveDevice.dcmStorage",
                "dcmStorageID",
                "{dcmStorageID}",
                "Create first a Storage!",
            ),
            Self::QueryRetrieveViewId => device(
                "dcmDevice.dcmArchiveDevice.dcmQueryRetrieveView",
                "dcmQueryRetrieveViewID",
                "{dcmQueryRetrieveViewID}",
                "Create first a Query Retrieve View!",
            ),
            Self::KeycloakServerId => device(
                "dcmDevice.dcmKeycloakServer",
                "dcmKeycloakServerID",
                "{dcmKeycloakServerID}",
                "Create first a Keycloak Server!",
            ),
            Self::BulkDataDescriptorId => device(
                "dcmDevice.dcmArchiveDevice.dcmBulkDataDescriptor",
                "dcmBulkDataDescriptorID",
                "{dcmBulkDataDescriptorID}",
                "Create first a Bulk Data Descriptor!",
            ),
            Self::AeTitle => provider("dicomAETitle", "{dicomAETitle}", "No AE Title configured!"),
            Self::DeviceName => {
                provider("dicomDeviceName", "{dicomDeviceName}", "No device configured!")
            }
            Self::Hl7ApplicationName => provider(
                "hl7ApplicationName",
                "{hl7ApplicationName}",
                "No HL7 Application configured!",
            ),
            Self::WebApp | Self::DefaultLanguage => return None,
        };
        Some(formatter)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tag's value list is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSource {
    /// Read a list from a fixed path of the device document.
    Device {
        path: &'static str,
        transform: Transform,
    },
    /// Ask the registered external provider.
    Provider,
}

/// Post-processing applied to a list read from the device document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    /// Add one entry per `dcmOtherAETitle` alias of each network AE.
    MergeAliases,
}

/// Static description of one dynamic format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formatter {
    /// Entry field holding the option value.
    pub key: &'static str,
    /// Title template for the option label.
    pub label: &'static str,
    /// Message shown when the list is empty.
    pub message: &'static str,
    pub source: FormatSource,
}

/// External source of existing identifiers (AE titles, devices ...).
#[async_trait]
pub trait ListProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<Value>, LookupError>;
}

/// One selectable value produced by a lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatOption {
    pub label: String,
    pub value: Value,
}

/// Result of a dynamic lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    Options(Vec<FormatOption>),
    /// Nothing to choose from yet; `message` tells the user what to create first.
    Missing { message: String },
}

/// Process-wide table from format tag to value-list lookup.
#[derive(Default)]
pub struct FormatRegistry {
    providers: HashMap<FormatTag, Arc<dyn ListProvider>>,
    cache: RwLock<HashMap<FormatTag, Vec<Value>>>,
    /// Held across a provider call so concurrent lookups of a tag share one fetch.
    fetching: Mutex<HashMap<FormatTag, Arc<Mutex<()>>>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an external provider to a provider-backed tag.
    pub fn register(&mut self, tag: FormatTag, provider: Arc<dyn ListProvider>) {
        self.providers.insert(tag, provider);
    }

    /// Seed the process-wide list for a tag; the provider is then never asked.
    pub async fn prime(&self, tag: FormatTag, values: Vec<Value>) {
        self.cache.write().await.insert(tag, values);
    }

    /// Drop cached provider lists, e.g. after a device was saved.
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }

    /// Produce the value list for `format`.
    ///
    /// Returns `None` when the format has no dynamic list, or when no
    /// provider is registered for it. An empty list, or a provider failure,
    /// yields [`FormatValue::Missing`].
    pub async fn lookup(&self, format: &str, device: &Value) -> Option<FormatValue> {
        let tag = FormatTag::parse(format)?;
        let formatter = tag.formatter()?;

        let values = match self.values(tag, &formatter, device).await {
            Ok(values) => values,
            Err(LookupError::Unregistered(tag)) => {
                debug!("no list provider for {tag}, rendering as plain field");
                return None;
            }
            Err(e) => {
                warn!("format lookup for {tag} failed: {e}");
                Vec::new()
            }
        };

        if values.is_empty() {
            return Some(FormatValue::Missing {
                message: formatter.message.to_string(),
            });
        }

        let options = values
            .iter()
            .map(|entry| match entry {
                Value::String(s) => FormatOption {
                    label: s.clone(),
                    value: entry.clone(),
                },
                other => FormatOption {
                    label: substitute_placeholders(formatter.label, other),
                    value: other.get(formatter.key).cloned().unwrap_or(Value::Null),
                },
            })
            .collect();
        Some(FormatValue::Options(options))
    }

    async fn values(
        &self,
        tag: FormatTag,
        formatter: &Formatter,
        device: &Value,
    ) -> Result<Vec<Value>, LookupError> {
        match formatter.source {
            FormatSource::Device { path, transform } => {
                let entries = match get_path(device, path) {
                    Some(Value::Array(entries)) => entries.clone(),
                    _ => Vec::new(),
                };
                Ok(match transform {
                    Transform::None => entries,
                    Transform::MergeAliases => merge_aliases(entries),
                })
            }
            FormatSource::Provider => {
                if let Some(cached) = self.cache.read().await.get(&tag) {
                    return Ok(cached.clone());
                }
                let provider = self
                    .providers
                    .get(&tag)
                    .ok_or_else(|| LookupError::Unregistered(tag.to_string()))?;

                let gate = self.fetching.lock().await.entry(tag).or_default().clone();
                let _fetch = gate.lock().await;
                if let Some(cached) = self.cache.read().await.get(&tag) {
                    return Ok(cached.clone());
                }
                debug!("fetching {tag} list from provider");
                let values = provider.list().await?;
                self.cache.write().await.insert(tag, values.clone());
                Ok(values)
            }
        }
    }
}

/// Expand every network AE with one entry per alias title.
fn merge_aliases(entries: Vec<Value>) -> Vec<Value> {
    let mut merged = Vec::with_capacity(entries.len());
    for entry in entries {
        let aliases: Vec<Value> = entry
            .get("dcmOtherAETitle")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        merged.push(entry.clone());
        for alias in aliases {
            let mut aliased = entry.clone();
            if let Value::Object(map) = &mut aliased {
                map.insert("dicomAETitle".to_string(), alias);
            }
            merged.push(aliased);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        values: Vec<Value>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ListProvider for CountingProvider {
        async fn list(&self) -> Result<Vec<Value>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.values.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ListProvider for FailingProvider {
        async fn list(&self) -> Result<Vec<Value>, LookupError> {
            Err(LookupError::Provider {
                tag: "dcmAETitle".into(),
                reason: "connection refused".into(),
            })
        }
    }

    #[test]
    fn test_tag_roundtrip() {
        for tag in [
            FormatTag::ArchiveAeTitle,
            FormatTag::QueueName,
            FormatTag::AeTitle,
            FormatTag::WebApp,
            FormatTag::DefaultLanguage,
        ] {
            assert_eq!(FormatTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(FormatTag::parse("dcmTag"), None);
        assert!(FormatTag::WebApp.is_cross_reference());
        assert!(!FormatTag::QueueName.is_cross_reference());
    }

    #[tokio::test]
    async fn test_device_path_lookup() {
        let registry = FormatRegistry::new();
        let device = json!({"dcmDevice": {"dcmArchiveDevice": {"dcmQueue": [
            {"dcmQueueName": "Export1"},
            {"dcmQueueName": "StgCmtSCP"}
        ]}}});
        let Some(FormatValue::Options(options)) = registry.lookup("dcmQueueName", &device).await
        else {
            panic!("expected options");
        };
        assert_eq!(options[0].label, "Export1");
        assert_eq!(options[1].value, json!("StgCmtSCP"));
    }

    #[tokio::test]
    async fn test_empty_device_path_is_missing() {
        let registry = FormatRegistry::new();
        let device = json!({"dcmDevice": {"dcmArchiveDevice": {"dcmQueue": []}}});
        assert_eq!(
            registry.lookup("dcmQueueName", &device).await,
            Some(FormatValue::Missing {
                message: "Create first a Queue!".into()
            })
        );
    }

    #[tokio::test]
    async fn test_archive_ae_title_merges_aliases() {
        let registry = FormatRegistry::new();
        let device = json!({"dicomNetworkAE": [
            {"dicomAETitle": "DCM4CHEE", "dcmOtherAETitle": ["DCM4CHEE_ALIAS"]},
            {"dicomAETitle": "STORESCP"}
        ]});
        let Some(FormatValue::Options(options)) =
            registry.lookup("dcmArchiveAETitle", &device).await
        else {
            panic!("expected options");
        };
        let labels: Vec<_> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["DCM4CHEE", "DCM4CHEE_ALIAS", "STORESCP"]);
    }

    #[tokio::test]
    async fn test_provider_cached() {
        let provider = Arc::new(CountingProvider {
            values: vec![json!({"dicomAETitle": "DCM4CHEE"})],
            calls: AtomicUsize::new(0),
        });
        let mut registry = FormatRegistry::new();
        registry.register(FormatTag::AeTitle, provider.clone());

        registry.lookup("dcmAETitle", &Value::Null).await;
        let second = registry.lookup("dcmAETitle", &Value::Null).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            second,
            Some(FormatValue::Options(vec![FormatOption {
                label: "DCM4CHEE".into(),
                value: json!("DCM4CHEE"),
            }]))
        );
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let provider = Arc::new(CountingProvider {
            values: vec![json!({"dicomAETitle": "DCM4CHEE"})],
            calls: AtomicUsize::new(0),
        });
        let mut registry = FormatRegistry::new();
        registry.register(FormatTag::AeTitle, provider.clone());

        let results = futures::future::join_all(
            (0..3).map(|_| registry.lookup("dcmAETitle", &Value::Null)),
        )
        .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Some(FormatValue::Options(o)) if o.len() == 1)));
    }

    #[tokio::test]
    async fn test_primed_list_skips_provider() {
        let provider = Arc::new(CountingProvider {
            values: Vec::new(),
            calls: AtomicUsize::new(0),
        });
        let mut registry = FormatRegistry::new();
        registry.register(FormatTag::DeviceName, provider.clone());
        registry
            .prime(FormatTag::DeviceName, vec![json!("dcm4chee-arc")])
            .await;

        let value = registry.lookup("dicomDeviceName", &Value::Null).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(value, Some(FormatValue::Options(o)) if o[0].label == "dcm4chee-arc"));
    }

    #[tokio::test]
    async fn test_failures_and_unknown_tags() {
        let mut registry = FormatRegistry::new();
        registry.register(FormatTag::AeTitle, Arc::new(FailingProvider));

        assert!(matches!(
            registry.lookup("dcmAETitle", &Value::Null).await,
            Some(FormatValue::Missing { .. })
        ));
        assert_eq!(registry.lookup("hl7ApplicationName", &Value::Null).await, None);
        assert_eq!(registry.lookup("webApp", &Value::Null).await, None);
        assert_eq!(registry.lookup("dcmTag", &Value::Null).await, None);
    }
}
