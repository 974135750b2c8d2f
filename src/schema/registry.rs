//! In-memory schema registry.

use super::{ResourceType, SchemaLookup};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Frozen set of resource types.
///
/// Built once through [`SchemaRegistryBuilder`] and then only read, so it
/// can be shared across requests behind an `Arc` without locking.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, ResourceType>,
}

/// Collects resource types before the registry is frozen.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    types: Vec<ResourceType>,
}

/// On-disk layout of a schema file
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    types: Vec<ResourceType>,
}

impl SchemaRegistryBuilder {
    pub fn register(mut self, resource_type: ResourceType) -> Self {
        self.types.push(resource_type);
        self
    }

    /// Validate and freeze.
    ///
    /// Rejects duplicate type names, duplicate field names and relationship
    /// fields that declare no target type.
    pub fn build(self) -> Result<Arc<SchemaRegistry>> {
        let mut types = HashMap::with_capacity(self.types.len());

        for resource_type in self.types {
            let mut seen = std::collections::HashSet::new();
            for field in &resource_type.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(Error::Config(format!(
                        "duplicate field '{}' on type '{}'",
                        field.name, resource_type.type_name
                    )));
                }
                if field.is_relationship && field.target_types.is_empty() {
                    return Err(Error::Config(format!(
                        "relationship '{}.{}' declares no target types",
                        resource_type.type_name, field.name
                    )));
                }
            }

            debug!(
                type_name = %resource_type.type_name,
                fields = resource_type.fields.len(),
                "Registering resource type"
            );

            let name = resource_type.type_name.clone();
            if types.insert(name.clone(), resource_type).is_some() {
                return Err(Error::Config(format!("duplicate resource type '{}'", name)));
            }
        }

        info!(types = types.len(), "Schema registry frozen");
        Ok(Arc::new(SchemaRegistry { types }))
    }
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Parse a TOML schema document
    pub fn from_toml_str(source: &str) -> Result<Arc<Self>> {
        let file: SchemaFile =
            toml::from_str(source).map_err(|e| Error::Config(format!("invalid schema: {}", e)))?;

        file.types
            .into_iter()
            .fold(Self::builder(), SchemaRegistryBuilder::register)
            .build()
    }

    /// Load a TOML schema file from disk
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// All registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl SchemaLookup for SchemaRegistry {
    fn resource_type(&self, type_name: &str) -> Result<&ResourceType> {
        self.types
            .get(type_name)
            .ok_or_else(|| Error::NotFound(format!("resource type {}", type_name)))
    }
}
