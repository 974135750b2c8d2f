//! Resource type schema.
//!
//! Both the query compiler and the document assembler need to know, for a
//! given resource type, which fields exist, which of them are relationships,
//! what they may point at and whether they carry a language qualifier. That
//! knowledge lives here, behind the [`SchemaLookup`] trait.
//!
//! Schemas are immutable once published: [`SchemaRegistry`] is assembled by
//! a builder and handed out behind `Arc`, with no mutating methods.

mod registry;

pub use registry::{SchemaRegistry, SchemaRegistryBuilder};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How many targets a relationship field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// Metadata for a single field of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,

    /// Whether the field references other records
    #[serde(default, rename = "relationship")]
    pub is_relationship: bool,

    /// Resource types the field may point at
    #[serde(default)]
    pub target_types: BTreeSet<String>,

    #[serde(default)]
    pub cardinality: Cardinality,

    /// Set for translatable fields: the column holding the language code
    #[serde(default)]
    pub language_key: Option<String>,
}

impl FieldSchema {
    /// Plain attribute field
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_relationship: false,
            target_types: BTreeSet::new(),
            cardinality: Cardinality::One,
            language_key: None,
        }
    }

    /// Relationship field pointing at the given types
    pub fn relationship<I, S>(name: impl Into<String>, cardinality: Cardinality, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            is_relationship: true,
            target_types: targets.into_iter().map(Into::into).collect(),
            cardinality,
            language_key: None,
        }
    }

    /// Mark the field as translatable
    pub fn translatable(mut self, language_key: impl Into<String>) -> Self {
        self.language_key = Some(language_key.into());
        self
    }

    pub fn is_translatable(&self) -> bool {
        self.language_key.is_some()
    }
}

/// A serializable resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    /// Public type name, e.g. `node--article`
    pub type_name: String,

    pub entity_type_id: String,

    pub bundle: String,

    /// Raw filter property carrying a language code
    #[serde(default)]
    pub language_key: Option<String>,

    /// Language applied to translatable fields when a filter names none
    #[serde(default)]
    pub default_language: Option<String>,

    /// Fields in declaration order
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl ResourceType {
    pub fn new(
        type_name: impl Into<String>,
        entity_type_id: impl Into<String>,
        bundle: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            entity_type_id: entity_type_id.into(),
            bundle: bundle.into(),
            language_key: None,
            default_language: None,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_language(mut self, key: impl Into<String>, default: Option<&str>) -> Self {
        self.language_key = Some(key.into());
        self.default_language = default.map(str::to_string);
        self
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Read-only access to resource type metadata.
pub trait SchemaLookup {
    /// Resolve a resource type by its public name
    fn resource_type(&self, type_name: &str) -> Result<&ResourceType>;

    /// Resolve one field of a resource type
    fn field_schema(&self, type_name: &str, field_name: &str) -> Result<&FieldSchema> {
        self.resource_type(type_name)?
            .field(field_name)
            .ok_or_else(|| Error::NotFound(format!("field {}.{}", type_name, field_name)))
    }

    /// Whether records of this type take part in serialization
    fn is_serializable(&self, type_name: &str) -> bool {
        self.resource_type(type_name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup_keeps_declaration_order() {
        let article = ResourceType::new("node--article", "node", "article")
            .with_field(FieldSchema::attribute("title"))
            .with_field(FieldSchema::relationship("uid", Cardinality::One, ["user--user"]))
            .with_field(FieldSchema::attribute("body"));

        let names: Vec<_> = article.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["title", "uid", "body"]);
        assert!(article.field("uid").unwrap().is_relationship);
        assert!(article.field("missing").is_none());
    }

    #[test]
    fn test_field_schema_from_toml() {
        let field: FieldSchema = toml::from_str(
            r#"
            name = "tags"
            relationship = true
            target_types = ["taxonomy_term--tags"]
            cardinality = "many"
            "#,
        )
        .unwrap();

        assert!(field.is_relationship);
        assert_eq!(field.cardinality, Cardinality::Many);
        assert!(field.target_types.contains("taxonomy_term--tags"));
        assert!(!field.is_translatable());
    }
}
