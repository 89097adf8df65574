//! # devconf
//!
//! Schema-driven form compilation for DICOM archive device configuration.
//!
//! A device document is a deeply nested JSON record (network connections,
//! application entities, archive extensions ...) described by a family of
//! JSON Schema documents linked through `$ref`. devconf turns one level of
//! that document into a list of renderable form fields, folds edited values
//! back into the document and rebuilds the breadcrumb trail of any nested
//! edit URL.
//!
//! ## Features
//!
//! - Lazy `$ref` resolution with per-tree memoisation
//! - Dynamic option lists for cross-referencing `format` tags
//! - Three display groups (extensions, children, attributes) with a visibility policy
//! - Value reconciliation with deletion markers and an inherited sentinel
//! - Rename propagation through wildcard reference paths
//! - Cancellable per-document sessions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use devconf::{config::ConfiguratorConfig, session::Configurator, store::FileDocumentStore};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let configurator = Configurator::with_store(
//!     ConfiguratorConfig::default(),
//!     Arc::new(FileDocumentStore::new("devices")),
//! );
//! let mut session = configurator.open("dcm4chee-arc").await?;
//! let form = session.compile_form(None, None).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`path`] - device/schema path algebra and edit URLs
//! - [`schema`] - schema loading and `$ref` resolution
//! - [`format`] - dynamic value lists for `format` tags
//! - [`form`] - form fields, groups and the compiler
//! - [`reconcile`] - merging edits and propagating renames
//! - [`breadcrumb`] - trail reconstruction
//! - [`session`] - per-document editing sessions

#[macro_use]
extern crate log;

pub mod breadcrumb;
pub mod config;
pub mod document;
pub mod error;
pub mod form;
pub mod format;
pub mod path;
pub mod reconcile;
pub mod schema;
pub mod session;
pub mod store;

/// Command line runner.
#[cfg(feature = "cli")]
pub mod run;

pub use error::{LookupError, PropagationError, SchemaError, StoreError};
pub use serde_json::Value;
