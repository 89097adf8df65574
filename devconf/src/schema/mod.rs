//! Schema documents and their lazy `$ref` resolution.

pub mod loader;
pub mod resolver;

pub use loader::{DirSchemaLoader, MemorySchemaLoader, SchemaLoader};
pub use resolver::{REF_KEY, SchemaTree};
