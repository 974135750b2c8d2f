//! Document assembly.
//!
//! Normalizes the primary data, flattens every nested include into one
//! deduplicated `included` list and attaches links and cache tags.

use super::context::{AccessCheck, AllowAll, NormalizationContext};
use super::normalizer::{IncludeState, ResourceNormalizer};
use super::value::{linkage, ResourceIdentifier, ResourceValue};
use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::links::{paged_link, DefaultLinkBuilder, LinkBuilder};
use crate::schema::{Cardinality, FieldSchema, ResourceType, SchemaLookup};
use crate::storage::{Record, RecordSource};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

static ALLOW_ALL: AllowAll = AllowAll;
static NO_BASE_URL: DefaultLinkBuilder = DefaultLinkBuilder::empty();

/// Top-level `data` member
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryData {
    One(Option<ResourceValue>),
    Many(Vec<ResourceValue>),
    /// Linkage only, for relationship documents
    Linkage {
        targets: Vec<ResourceIdentifier>,
        cardinality: Cardinality,
    },
}

/// Document-level links
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentLinks {
    pub self_link: Option<String>,
    pub related: Option<String>,
    pub next: Option<String>,
    pub prev: Option<String>,
}

impl DocumentLinks {
    fn rasterize(&self) -> Option<Value> {
        let mut links = Map::new();
        for (name, link) in [
            ("self", &self.self_link),
            ("related", &self.related),
            ("next", &self.next),
            ("prev", &self.prev),
        ] {
            if let Some(link) = link {
                links.insert(name.to_string(), Value::String(link.clone()));
            }
        }
        (!links.is_empty()).then_some(Value::Object(links))
    }
}

/// An assembled document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub data: PrimaryData,
    /// Related resources, unique by identifier, never a primary resource
    pub included: Vec<ResourceValue>,
    pub links: DocumentLinks,
    /// Invalidation tags for every resource in the document
    pub cache_tags: Vec<String>,
}

impl Document {
    /// Render the wire format
    pub fn rasterize(&self) -> Value {
        let data = match &self.data {
            PrimaryData::One(value) => value.as_ref().map_or(Value::Null, ResourceValue::rasterize),
            PrimaryData::Many(values) => Value::Array(values.iter().map(ResourceValue::rasterize).collect()),
            PrimaryData::Linkage {
                targets,
                cardinality,
            } => linkage(targets, *cardinality),
        };

        let mut document = Map::new();
        document.insert("data".into(), data);
        if !self.included.is_empty() {
            document.insert(
                "included".into(),
                Value::Array(self.included.iter().map(ResourceValue::rasterize).collect()),
            );
        }
        if let Some(links) = self.links.rasterize() {
            document.insert("links".into(), links);
        }
        Value::Object(document)
    }

    /// Identifiers of the primary resources
    pub fn primary_identifiers(&self) -> Vec<&ResourceIdentifier> {
        match &self.data {
            PrimaryData::One(value) => value.iter().map(|v| &v.identifier).collect(),
            PrimaryData::Many(values) => values.iter().map(|v| &v.identifier).collect(),
            PrimaryData::Linkage { targets, .. } => targets.iter().collect(),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.rasterize().serialize(serializer)
    }
}

/// Builds documents from records
pub struct DocumentAssembler<'a> {
    schema: &'a dyn SchemaLookup,
    source: &'a dyn RecordSource,
    access: &'a dyn AccessCheck,
    links: &'a dyn LinkBuilder,
}

impl<'a> DocumentAssembler<'a> {
    /// Allow-all access and root-relative links
    pub fn new(schema: &'a dyn SchemaLookup, source: &'a dyn RecordSource) -> Self {
        Self {
            schema,
            source,
            access: &ALLOW_ALL,
            links: &NO_BASE_URL,
        }
    }

    pub fn with_access(mut self, access: &'a dyn AccessCheck) -> Self {
        self.access = access;
        self
    }

    pub fn with_links(mut self, links: &'a dyn LinkBuilder) -> Self {
        self.links = links;
        self
    }

    fn normalizer(&self) -> ResourceNormalizer<'a> {
        ResourceNormalizer::new(self.schema, self.source, self.access, self.links)
    }

    /// Document for one record
    #[instrument(skip_all, fields(record = %format!("{}:{}", record.type_name, record.id)))]
    pub fn assemble_individual(&self, record: &Record, context: &NormalizationContext) -> Result<Document> {
        let identifier = record.identifier();
        let mut state = IncludeState::with_primaries([&identifier]);
        let mut value = self.normalize_primary(record, context, &mut state)?;

        let included = flatten(std::slice::from_mut(&mut value));
        let cache_tags = self.cache_tags(&[], std::slice::from_ref(&value), &included);
        info!(included = included.len(), "Assembled individual document");

        Ok(Document {
            data: PrimaryData::One(Some(value)),
            included,
            links: DocumentLinks {
                self_link: context.request_url.clone(),
                ..DocumentLinks::default()
            },
            cache_tags,
        })
    }

    /// Document for a collection of `type_name` records, in the given order.
    ///
    /// The type is given separately so an empty collection still carries
    /// its list tag.
    #[instrument(skip_all, fields(type_name = %type_name, count = records.len()))]
    pub fn assemble_collection(
        &self,
        type_name: &str,
        records: &[Record],
        context: &NormalizationContext,
    ) -> Result<Document> {
        self.schema.resource_type(type_name)?;
        let identifiers: Vec<ResourceIdentifier> = records.iter().map(Record::identifier).collect();
        let mut state = IncludeState::with_primaries(&identifiers);

        let mut values = Vec::with_capacity(records.len());
        for record in records {
            values.push(self.normalize_primary(record, context, &mut state)?);
        }

        let included = flatten(&mut values);
        let cache_tags = self.cache_tags(&[type_name], &values, &included);
        info!(
            primary = values.len(),
            included = included.len(),
            "Assembled collection document"
        );

        Ok(Document {
            links: self.collection_links(context, values.len()),
            data: PrimaryData::Many(values),
            included,
            cache_tags,
        })
    }

    /// Document whose primary data are the targets of one relationship
    #[instrument(skip_all, fields(field = %field_name))]
    pub fn assemble_related(
        &self,
        record: &Record,
        field_name: &str,
        context: &NormalizationContext,
    ) -> Result<Document> {
        let field = self.visible_relationship(record, field_name, context)?;

        let mut targets = Vec::new();
        for identifier in record.relationship_targets(field) {
            let Some(target) = self.source.load(&identifier)? else {
                debug!(target = %identifier, "Related target not found");
                continue;
            };
            if self.access.can_view_record(&target, &context.viewer)
                && self.schema.is_serializable(&target.type_name)
            {
                targets.push(target);
            }
        }

        let identifiers: Vec<ResourceIdentifier> = targets.iter().map(Record::identifier).collect();
        let mut state = IncludeState::with_primaries(&identifiers);
        let mut values = Vec::with_capacity(targets.len());
        for target in &targets {
            values.push(self.normalize_primary(target, context, &mut state)?);
        }

        let included = flatten(&mut values);
        let list_types: Vec<&str> = match field.cardinality {
            Cardinality::One => Vec::new(),
            Cardinality::Many => field.target_types.iter().map(String::as_str).collect(),
        };
        let cache_tags = self.cache_tags(&list_types, &values, &included);
        let links = DocumentLinks {
            self_link: context.request_url.clone(),
            ..DocumentLinks::default()
        };

        let data = match field.cardinality {
            Cardinality::One => PrimaryData::One(values.into_iter().next()),
            Cardinality::Many => PrimaryData::Many(values),
        };
        Ok(Document {
            data,
            included,
            links,
            cache_tags,
        })
    }

    /// Linkage-only document for one relationship
    pub fn assemble_relationship(
        &self,
        record: &Record,
        field_name: &str,
        context: &NormalizationContext,
    ) -> Result<Document> {
        let field = self.visible_relationship(record, field_name, context)?;
        let owner = record.identifier();

        Ok(Document {
            data: PrimaryData::Linkage {
                targets: record.relationship_targets(field),
                cardinality: field.cardinality,
            },
            included: Vec::new(),
            links: DocumentLinks {
                self_link: Some(format!("{}/relationships/{}", self.links.self_link(&owner), field_name)),
                related: Some(format!("{}/{}", self.links.self_link(&owner), field_name)),
                ..DocumentLinks::default()
            },
            cache_tags: self.tag_for(&owner).into_iter().collect(),
        })
    }

    /// Validate a relationship write payload `{"data": linkage}`.
    ///
    /// To-one fields take an identifier or null, to-many fields a list. Every
    /// identifier must name one of the field's target types.
    pub fn parse_relationship_payload(
        &self,
        type_name: &str,
        field_name: &str,
        payload: &Value,
    ) -> Result<Vec<ResourceIdentifier>> {
        let field = self
            .schema
            .field_schema(type_name, field_name)
            .map_err(|_| Error::InvalidRelationship(format!("{} has no field '{}'", type_name, field_name)))?;
        if !field.is_relationship {
            return Err(Error::InvalidRelationship(format!(
                "'{}' is not a relationship field",
                field_name
            )));
        }

        let data = payload
            .as_object()
            .and_then(|p| p.get("data"))
            .ok_or_else(|| Error::InvalidRelationship("payload needs a 'data' member".into()))?;

        let items: Vec<&Value> = match (field.cardinality, data) {
            (Cardinality::One, Value::Null) => Vec::new(),
            (Cardinality::One, Value::Object(_)) => vec![data],
            (Cardinality::Many, Value::Array(items)) => items.iter().collect(),
            (Cardinality::One, _) => {
                return Err(Error::InvalidRelationship(format!(
                    "'{}' is to-one and takes an identifier or null",
                    field_name
                )))
            }
            (Cardinality::Many, _) => {
                return Err(Error::InvalidRelationship(format!(
                    "'{}' is to-many and takes a list of identifiers",
                    field_name
                )))
            }
        };

        items
            .into_iter()
            .map(|item| parse_identifier(item, field))
            .collect()
    }

    fn normalize_primary(
        &self,
        record: &Record,
        context: &NormalizationContext,
        state: &mut IncludeState,
    ) -> Result<ResourceValue> {
        if !self.access.can_view_record(record, &context.viewer) {
            return Err(Error::AccessDenied(format!("{}:{}", record.type_name, record.id)));
        }
        let resource_type = self.schema.resource_type(&record.type_name)?;
        self.normalizer().normalize_with(record, resource_type, context, state)
    }

    fn visible_relationship(
        &self,
        record: &Record,
        field_name: &str,
        context: &NormalizationContext,
    ) -> Result<&'a FieldSchema> {
        if !self.access.can_view_record(record, &context.viewer) {
            return Err(Error::AccessDenied(format!("{}:{}", record.type_name, record.id)));
        }
        let field = self.schema.field_schema(&record.type_name, field_name)?;
        if !field.is_relationship {
            return Err(Error::NotFound(format!(
                "relationship {}.{}",
                record.type_name, field_name
            )));
        }
        if !self.access.can_view(record, field_name, &context.viewer) {
            return Err(Error::AccessDenied(format!(
                "{}:{}.{}",
                record.type_name, record.id, field_name
            )));
        }
        Ok(field)
    }

    fn collection_links(&self, context: &NormalizationContext, returned: usize) -> DocumentLinks {
        let mut links = DocumentLinks {
            self_link: context.request_url.clone(),
            ..DocumentLinks::default()
        };
        if let (Some(url), Some(page)) = (&context.request_url, context.page) {
            if returned >= page.limit {
                links.next = Some(paged_link(url, page.offset.saturating_add(page.limit), page.limit));
            }
            if page.offset > 0 {
                links.prev = Some(paged_link(url, page.offset.saturating_sub(page.limit), page.limit));
            }
        }
        links
    }

    fn tag_for(&self, identifier: &ResourceIdentifier) -> Option<String> {
        self.schema
            .resource_type(&identifier.type_name)
            .ok()
            .map(|rt: &ResourceType| format!("{}:{}", rt.entity_type_id, identifier.id))
    }

    /// `{entity}:{id}` per resource, then `{entity}_list` per listed type
    fn cache_tags(
        &self,
        list_types: &[&str],
        primary: &[ResourceValue],
        included: &[ResourceValue],
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let list_tags = list_types
            .iter()
            .filter_map(|t| self.schema.resource_type(t).ok())
            .map(|rt| format!("{}_list", rt.entity_type_id));

        primary
            .iter()
            .chain(included)
            .filter_map(|v| self.tag_for(&v.identifier))
            .chain(list_tags)
            .filter(|tag| seen.insert(tag.clone()))
            .collect()
    }
}

fn parse_identifier(item: &Value, field: &FieldSchema) -> Result<ResourceIdentifier> {
    let type_name = item
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRelationship("identifier needs a string 'type'".into()))?;
    let id = item
        .get("id")
        .map(|id| Datum::from(id.clone()))
        .and_then(|id| id.as_key())
        .ok_or_else(|| Error::InvalidRelationship("identifier needs an 'id'".into()))?;

    if !field.target_types.contains(type_name) {
        return Err(Error::InvalidRelationship(format!(
            "'{}' may not point at type '{}'",
            field.name, type_name
        )));
    }
    Ok(ResourceIdentifier::new(type_name, id))
}

/// Move every nested include out of `primary` into one list.
///
/// Pre-order over each primary resource in turn; the first occurrence of an
/// identifier wins and primary identifiers are never included.
pub(crate) fn flatten(primary: &mut [ResourceValue]) -> Vec<ResourceValue> {
    let mut arena: Vec<ResourceValue> = Vec::new();
    let mut index: HashMap<ResourceIdentifier, usize> = HashMap::new();
    let primary_ids: HashSet<ResourceIdentifier> = primary.iter().map(|v| v.identifier.clone()).collect();

    for value in primary.iter_mut() {
        let mut stack: Vec<ResourceValue> = std::mem::take(&mut value.nested_includes);
        stack.reverse();

        while let Some(mut next) = stack.pop() {
            let children = std::mem::take(&mut next.nested_includes);
            stack.extend(children.into_iter().rev());

            if primary_ids.contains(&next.identifier) || index.contains_key(&next.identifier) {
                continue;
            }
            index.insert(next.identifier.clone(), arena.len());
            arena.push(next);
        }
    }

    debug!(included = arena.len(), "Flattened includes");
    arena
}
