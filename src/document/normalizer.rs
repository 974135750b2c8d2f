//! Per-record normalization.
//!
//! Turns a [`Record`] into a [`ResourceValue`]: attributes and relationships
//! in schema declaration order, with the targets of active include paths
//! loaded and normalized into `nested_includes`.

use super::context::{AccessCheck, NormalizationContext};
use super::value::{FieldValue, ResourceIdentifier, ResourceLinks, ResourceValue};
use crate::error::Result;
use crate::links::LinkBuilder;
use crate::schema::{FieldSchema, ResourceType, SchemaLookup};
use crate::storage::{Record, RecordSource};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Bookkeeping shared by every record of one assembly.
///
/// A target is normalized once (`normalized`); reaching it again by a new
/// path only walks its relationships under that path. `visited` stops
/// repeated walks of the same target along the same path, which is what
/// ends reference cycles.
#[derive(Debug, Default)]
pub(crate) struct IncludeState {
    normalized: HashSet<ResourceIdentifier>,
    visited: HashSet<(ResourceIdentifier, String)>,
}

impl IncludeState {
    /// Primary resources count as already normalized
    pub(crate) fn with_primaries<'r, I>(primaries: I) -> Self
    where
        I: IntoIterator<Item = &'r ResourceIdentifier>,
    {
        Self {
            normalized: primaries.into_iter().cloned().collect(),
            visited: HashSet::new(),
        }
    }
}

/// Normalizes records against a schema
pub struct ResourceNormalizer<'a> {
    pub(crate) schema: &'a dyn SchemaLookup,
    pub(crate) source: &'a dyn RecordSource,
    pub(crate) access: &'a dyn AccessCheck,
    pub(crate) links: &'a dyn LinkBuilder,
}

impl<'a> ResourceNormalizer<'a> {
    pub fn new(
        schema: &'a dyn SchemaLookup,
        source: &'a dyn RecordSource,
        access: &'a dyn AccessCheck,
        links: &'a dyn LinkBuilder,
    ) -> Self {
        Self {
            schema,
            source,
            access,
            links,
        }
    }

    /// Normalize a single record on its own
    pub fn normalize_record(
        &self,
        record: &Record,
        resource_type: &ResourceType,
        context: &NormalizationContext,
    ) -> Result<ResourceValue> {
        let identifier = record.identifier();
        let mut state = IncludeState::with_primaries([&identifier]);
        self.normalize_with(record, resource_type, context, &mut state)
    }

    pub(crate) fn normalize_with(
        &self,
        record: &Record,
        resource_type: &ResourceType,
        context: &NormalizationContext,
        state: &mut IncludeState,
    ) -> Result<ResourceValue> {
        self.normalize_at(record, resource_type, context, "", state)
    }

    fn normalize_at(
        &self,
        record: &Record,
        resource_type: &ResourceType,
        context: &NormalizationContext,
        prefix: &str,
        state: &mut IncludeState,
    ) -> Result<ResourceValue> {
        let identifier = record.identifier();
        let links = ResourceLinks {
            self_link: self.links.self_link(&identifier),
            type_link: self.links.type_link(&identifier.type_name),
        };
        let mut value = ResourceValue::new(identifier, links);

        for field in &resource_type.fields {
            // a relationship missing from the record is an empty one
            let raw = record.get(&field.name);
            if raw.is_none() && !field.is_relationship {
                continue;
            }
            if !self.access.can_view(record, &field.name, &context.viewer) {
                debug!(record = %value.identifier, field = %field.name, "Field hidden by access check");
                continue;
            }

            if field.is_relationship {
                if !self.has_serializable_target(field) {
                    debug!(field = %field.name, "Relationship has no serializable target type");
                    continue;
                }
                let targets = record.relationship_targets(field);
                let path = join_path(prefix, &field.name);
                if context.is_include_active(&path) {
                    for target in &targets {
                        self.include_target(target, &path, context, state, &mut value.nested_includes)?;
                    }
                }
                value.fields.push((
                    field.name.clone(),
                    FieldValue::Relationship {
                        targets,
                        cardinality: field.cardinality,
                    },
                ));
            } else if let Some(raw) =
                raw.filter(|_| context.allows_attribute(&resource_type.type_name, &field.name))
            {
                value
                    .fields
                    .push((field.name.clone(), FieldValue::Attribute(raw.clone())));
            }
        }

        Ok(value)
    }

    /// Pull one relationship target into `nested`
    fn include_target(
        &self,
        target: &ResourceIdentifier,
        path: &str,
        context: &NormalizationContext,
        state: &mut IncludeState,
        nested: &mut Vec<ResourceValue>,
    ) -> Result<()> {
        if !state.visited.insert((target.clone(), path.to_string())) {
            return Ok(());
        }

        let Some(record) = self.source.load(target)? else {
            warn!(target = %target, path = %path, "Included target not found");
            return Ok(());
        };
        if !self.access.can_view_record(&record, &context.viewer) {
            debug!(target = %target, "Included target hidden by access check");
            return Ok(());
        }
        let Ok(resource_type) = self.schema.resource_type(&target.type_name) else {
            debug!(target = %target, "Included target has no serializable type");
            return Ok(());
        };

        if state.normalized.insert(target.clone()) {
            let value = self.normalize_at(&record, resource_type, context, path, state)?;
            nested.push(value);
        } else {
            self.extend_traversal(&record, resource_type, context, path, state, nested)?;
        }
        Ok(())
    }

    /// Follow the relationships of an already-normalized record under a new path
    fn extend_traversal(
        &self,
        record: &Record,
        resource_type: &ResourceType,
        context: &NormalizationContext,
        prefix: &str,
        state: &mut IncludeState,
        nested: &mut Vec<ResourceValue>,
    ) -> Result<()> {
        for field in resource_type.fields.iter().filter(|f| f.is_relationship) {
            let path = join_path(prefix, &field.name);
            if !context.is_include_active(&path)
                || !self.access.can_view(record, &field.name, &context.viewer)
                || !self.has_serializable_target(field)
            {
                continue;
            }
            for target in record.relationship_targets(field) {
                self.include_target(&target, &path, context, state, nested)?;
            }
        }
        Ok(())
    }

    fn has_serializable_target(&self, field: &FieldSchema) -> bool {
        field
            .target_types
            .iter()
            .any(|t| self.schema.is_serializable(t))
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}
