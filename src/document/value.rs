//! Normalized resource values and their wire rendering.

use crate::datum::Datum;
use crate::schema::Cardinality;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// `{type, id}` pair naming one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    pub fn rasterize(&self) -> Value {
        json!({"type": self.type_name, "id": self.id})
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// One normalized field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Attribute(Datum),
    Relationship {
        targets: Vec<ResourceIdentifier>,
        cardinality: Cardinality,
    },
}

impl FieldValue {
    pub fn is_relationship(&self) -> bool {
        matches!(self, FieldValue::Relationship { .. })
    }

    /// Attributes render as plain values, relationships as `{data: linkage}`
    pub fn rasterize(&self) -> Value {
        match self {
            FieldValue::Attribute(value) => Value::from(value),
            FieldValue::Relationship {
                targets,
                cardinality,
            } => json!({ "data": linkage(targets, *cardinality) }),
        }
    }
}

/// Linkage for a relationship: one identifier or null, or a list
pub fn linkage(targets: &[ResourceIdentifier], cardinality: Cardinality) -> Value {
    match cardinality {
        Cardinality::One => targets
            .first()
            .map(ResourceIdentifier::rasterize)
            .unwrap_or(Value::Null),
        Cardinality::Many => Value::Array(targets.iter().map(ResourceIdentifier::rasterize).collect()),
    }
}

/// Links carried by every resource object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceLinks {
    pub self_link: String,
    pub type_link: String,
}

/// A record after normalization.
///
/// `nested_includes` holds the related resources pulled in by include
/// paths below this one. The assembler moves them out when it flattens the
/// document, so a rasterized value never carries them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceValue {
    pub identifier: ResourceIdentifier,
    pub links: ResourceLinks,
    pub fields: Vec<(String, FieldValue)>,
    pub nested_includes: Vec<ResourceValue>,
}

impl ResourceValue {
    pub fn new(identifier: ResourceIdentifier, links: ResourceLinks) -> Self {
        Self {
            identifier,
            links,
            fields: Vec::new(),
            nested_includes: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn rasterize(&self) -> Value {
        let mut attributes = Map::new();
        let mut relationships = Map::new();
        for (name, value) in &self.fields {
            let target = if value.is_relationship() {
                &mut relationships
            } else {
                &mut attributes
            };
            target.insert(name.clone(), value.rasterize());
        }

        let mut object = Map::new();
        object.insert("type".into(), Value::from(self.identifier.type_name.as_str()));
        object.insert("id".into(), Value::from(self.identifier.id.as_str()));
        if !attributes.is_empty() {
            object.insert("attributes".into(), Value::Object(attributes));
        }
        if !relationships.is_empty() {
            object.insert("relationships".into(), Value::Object(relationships));
        }
        object.insert(
            "links".into(),
            json!({"self": self.links.self_link, "type": self.links.type_link}),
        );
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_to_one_renders_null() {
        let empty = FieldValue::Relationship {
            targets: vec![],
            cardinality: Cardinality::One,
        };
        assert_eq!(empty.rasterize(), json!({"data": null}));

        let many = FieldValue::Relationship {
            targets: vec![],
            cardinality: Cardinality::Many,
        };
        assert_eq!(many.rasterize(), json!({"data": []}));
    }

    #[test]
    fn test_resource_object_layout() {
        let mut value = ResourceValue::new(
            ResourceIdentifier::new("article", "1"),
            ResourceLinks {
                self_link: "/article/1".into(),
                type_link: "/article".into(),
            },
        );
        value.fields.push(("title".into(), FieldValue::Attribute(Datum::from("Hello"))));
        value.fields.push((
            "author".into(),
            FieldValue::Relationship {
                targets: vec![ResourceIdentifier::new("user", "7")],
                cardinality: Cardinality::One,
            },
        ));

        assert_eq!(
            value.rasterize(),
            json!({
                "type": "article",
                "id": "1",
                "attributes": {"title": "Hello"},
                "relationships": {"author": {"data": {"type": "user", "id": "7"}}},
                "links": {"self": "/article/1", "type": "/article"}
            })
        );
    }

    #[test]
    fn test_no_fields_omits_blocks() {
        let value = ResourceValue::new(ResourceIdentifier::new("user", "7"), ResourceLinks::default());
        let raster = value.rasterize();
        assert!(raster.get("attributes").is_none());
        assert!(raster.get("relationships").is_none());
    }
}
