//! Editing sessions.
//!
//! A [`Configurator`] holds everything shared between documents: settings,
//! the schema loader, the format registry and the stores. Each open
//! document gets its own [`DeviceSession`], which owns the document, its
//! schema tree and the cancellation token of the form being compiled.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    breadcrumb::{Breadcrumb, Navigator},
    config::ConfiguratorConfig,
    document,
    error::{PropagationError, StoreError},
    form::{FormCompiler, FormField, FormParams, Group},
    format::FormatRegistry,
    path::{DevicePath, EditUrl, get_path},
    reconcile::propagate_value,
    schema::{DirSchemaLoader, SchemaLoader, SchemaTree},
    store::{DocumentStore, FilePreferenceStore, LANGUAGE_CONFIG_KEY, PreferenceStore},
};

const DEVICE_NAME: &str = "dicomDeviceName";
const LANGUAGE_CONFIG: &str = "dcmDevice.dcmuiConfig[0].dcmuiLanguageConfig[0]";

/// Process-wide collaborators shared by all sessions.
pub struct Configurator {
    config: ConfiguratorConfig,
    loader: Arc<dyn SchemaLoader>,
    registry: Arc<FormatRegistry>,
    store: Arc<dyn DocumentStore>,
    preferences: Arc<dyn PreferenceStore>,
}

impl Configurator {
    pub fn new(
        config: ConfiguratorConfig,
        loader: Arc<dyn SchemaLoader>,
        registry: Arc<FormatRegistry>,
        store: Arc<dyn DocumentStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            config,
            loader,
            registry,
            store,
            preferences,
        }
    }

    /// Schemas from `config.schema_dir`, preferences in `config.preference_file`.
    pub fn with_store(config: ConfiguratorConfig, store: Arc<dyn DocumentStore>) -> Self {
        let loader = Arc::new(DirSchemaLoader::new(&config.schema_dir));
        let preferences = Arc::new(FilePreferenceStore::new(&config.preference_file));
        Self::new(
            config,
            loader,
            Arc::new(FormatRegistry::new()),
            store,
            preferences,
        )
    }

    pub fn config(&self) -> &ConfiguratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    /// Fetch a stored device and open a session on it.
    pub async fn open(&self, id: &str) -> anyhow::Result<DeviceSession> {
        let device = self
            .store
            .fetch(id)
            .await
            .with_context(|| format!("failed to fetch device {id}"))?;
        self.session(id, device).await
    }

    /// Open a session on a device document obtained elsewhere.
    pub async fn session(&self, id: &str, device: Value) -> anyhow::Result<DeviceSession> {
        let schema = SchemaTree::load(&self.config.root_schema, self.loader.clone())
            .await
            .with_context(|| format!("failed to load schema {}", self.config.root_schema))?;
        info!("opened device {id}");
        Ok(DeviceSession {
            document_id: id.to_string(),
            device,
            schema,
            registry: self.registry.clone(),
            store: self.store.clone(),
            preferences: self.preferences.clone(),
            config: self.config.clone(),
            pinned: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Session on an empty document, saved later with [`DeviceSession::create`].
    pub async fn new_device(&self) -> anyhow::Result<DeviceSession> {
        self.session("", Value::Object(Map::new())).await
    }
}

/// One document being edited.
pub struct DeviceSession {
    document_id: String,
    device: Value,
    schema: SchemaTree,
    registry: Arc<FormatRegistry>,
    store: Arc<dyn DocumentStore>,
    preferences: Arc<dyn PreferenceStore>,
    config: ConfiguratorConfig,
    /// Group chosen explicitly by the user; sticks for the session.
    pinned: Option<Group>,
    cancel: CancellationToken,
}

impl DeviceSession {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn device(&self) -> &Value {
        &self.device
    }

    pub fn schema(&self) -> &SchemaTree {
        &self.schema
    }

    pub fn pinned_group(&self) -> Option<Group> {
        self.pinned
    }

    /// Token of the current navigation; cancel it to drop the form in flight.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Leave the current edit context: anything still compiling for it is discarded.
    pub fn navigate(&mut self) -> CancellationToken {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }

    /// Compile the form for an edit URL; `None` addresses the document root.
    ///
    /// `group` pins the open group for this and every later form. Returns
    /// `None` when the URL is not an edit URL or when the current navigation
    /// is cancelled before the form is ready. Call [`Self::navigate`] to
    /// start a new one.
    pub async fn compile_form(
        &mut self,
        url: Option<&str>,
        group: Option<Group>,
    ) -> Option<Vec<FormField>> {
        let params = match url {
            Some(url) => {
                let Some(edit_url) = EditUrl::parse(url) else {
                    warn!("`{url}` is not an edit url");
                    return None;
                };
                FormParams::from_url(&edit_url)
            }
            None => FormParams::root(self.document_id.clone()),
        };
        if group.is_some() {
            self.pinned = group;
        }
        let token = self.cancel.clone();
        let schema_path = params.schema_path.clone().unwrap_or_default();

        let work = async {
            let schema = self.schema.resolve_deep(&schema_path).await.clone();
            let subtree = match &params.device_path {
                Some(path) => get_path(&self.device, path)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new())),
                None => self.device.clone(),
            };
            FormCompiler::new(&self.registry, &self.device, &params)
                .open_group(self.config.default_group)
                .pin(self.pinned)
                .compile(&subtree, &schema)
                .await
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("form for {schema_path:?} discarded after navigation");
                None
            }
            form = work => (!token.is_cancelled()).then_some(form),
        }
    }

    /// Breadcrumbs from the device list down to `url`.
    ///
    /// The schema path of every level is resolved first, so titles do not
    /// depend on which forms were compiled before.
    pub async fn trail(&mut self, url: &str) -> Vec<Breadcrumb> {
        if let Some(mut level) = EditUrl::parse(url) {
            while !level.is_root() {
                self.schema.resolve_deep(&level.schema_path).await;
                let parent = level.parent();
                if parent == level {
                    break;
                }
                level = parent;
            }
        }
        Navigator::new(&self.device, &self.schema, self.document_id.clone())
            .with_home(self.config.device_list_breadcrumb())
            .trail(url)
    }

    /// Merge submitted form values into the subtree at `device_path`.
    pub fn apply_edits(&mut self, device_path: Option<&str>, edits: &Map<String, Value>) -> bool {
        document::merge_at(&mut self.device, device_path, edits)
    }

    /// Keep copies of a renamed identifier in sync; see [`propagate_value`].
    pub fn propagate(
        &mut self,
        old: &Value,
        new: &Value,
        references: &[&str],
    ) -> Vec<PropagationError> {
        propagate_value(&mut self.device, old, new, references)
    }

    /// Rename the AE at `device_path` everywhere inside that AE.
    pub fn rename_ae_title(&mut self, device_path: &str, new_title: &str) -> usize {
        match DevicePath::parse(device_path).and_then(|p| p.get_mut(&mut self.device)) {
            Some(ae) => document::rename_ae_title(ae, new_title),
            None => 0,
        }
    }

    pub fn remove_array_element(&mut self, path: &str, index: usize) -> Option<Value> {
        document::remove_array_element(&mut self.device, path, index)
    }

    pub fn remove_extension(&mut self, device_path: &str) -> Option<Value> {
        document::remove_extension(&mut self.device, device_path)
    }

    /// Whether an element like `new_value` already exists in the array of `params`.
    pub fn is_duplicate_child(&self, new_value: &Value, params: &FormParams) -> bool {
        document::is_duplicate_child(&self.device, &self.schema, new_value, params)
    }

    fn device_name(&self) -> Result<String, StoreError> {
        self.device
            .get(DEVICE_NAME)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or(StoreError::MissingDeviceName)
    }

    /// Store the document as a new device.
    pub async fn create(&mut self) -> Result<(), StoreError> {
        let name = self.device_name()?;
        self.store.create(&name, &self.device).await?;
        info!("created device {name}");
        self.document_id = name;
        self.registry.invalidate().await;
        Ok(())
    }

    /// Replace the stored device and remember its language configuration.
    pub async fn update(&self) -> Result<(), StoreError> {
        let name = self.device_name()?;
        self.save_language_preference().await;
        self.store.update(&name, &self.device).await?;
        info!("updated device {name}");
        self.registry.invalidate().await;
        Ok(())
    }

    async fn save_language_preference(&self) {
        let result = match get_path(&self.device, LANGUAGE_CONFIG) {
            Some(languages) => {
                self.preferences
                    .set(LANGUAGE_CONFIG_KEY, languages.clone())
                    .await
            }
            None => self.preferences.remove(LANGUAGE_CONFIG_KEY).await,
        };
        if let Err(e) = result {
            warn!("failed to save language preference: {e:#}");
        }
    }
}
