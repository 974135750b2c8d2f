//! Per-request normalization settings and access checks.

use crate::error::{Error, Result};
use crate::query::expression::Page;
use crate::query::params::RequestParams;
use crate::schema::{ResourceType, SchemaLookup};
use crate::storage::Record;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Who is asking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub name: Option<String>,
    pub roles: BTreeSet<String>,
}

/// Role that passes every check
pub const ADMIN_ROLE: &str = "admin";

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role) || self.roles.contains(ADMIN_ROLE)
    }
}

/// View permissions, consulted per record and per field
pub trait AccessCheck {
    fn can_view_record(&self, record: &Record, viewer: &Viewer) -> bool;

    fn can_view(&self, record: &Record, field: &str, viewer: &Viewer) -> bool;
}

/// Grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessCheck for AllowAll {
    fn can_view_record(&self, _record: &Record, _viewer: &Viewer) -> bool {
        true
    }

    fn can_view(&self, _record: &Record, _field: &str, _viewer: &Viewer) -> bool {
        true
    }
}

/// Role requirements per resource type and per field.
///
/// Anything without a rule is visible to everyone.
#[derive(Debug, Clone, Default)]
pub struct RoleAccess {
    types: HashMap<String, String>,
    fields: HashMap<(String, String), String>,
}

impl RoleAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `role` to see records of `type_name` at all
    pub fn restrict_type(mut self, type_name: impl Into<String>, role: impl Into<String>) -> Self {
        self.types.insert(type_name.into(), role.into());
        self
    }

    /// Require `role` to see one field
    pub fn restrict_field(
        mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.fields
            .insert((type_name.into(), field.into()), role.into());
        self
    }
}

impl AccessCheck for RoleAccess {
    fn can_view_record(&self, record: &Record, viewer: &Viewer) -> bool {
        self.types
            .get(&record.type_name)
            .map_or(true, |role| viewer.has_role(role))
    }

    fn can_view(&self, record: &Record, field: &str, viewer: &Viewer) -> bool {
        self.fields
            .get(&(record.type_name.clone(), field.to_string()))
            .map_or(true, |role| viewer.has_role(role))
    }
}

/// Settings for one normalization pass
#[derive(Debug, Clone, Default)]
pub struct NormalizationContext {
    pub viewer: Viewer,
    /// Sparse fieldsets: type name to the attributes it may show
    pub fieldsets: HashMap<String, HashSet<String>>,
    /// Dotted relationship paths whose targets go into `included`
    pub includes: Vec<String>,
    /// URL of the current request, used for document links
    pub request_url: Option<String>,
    pub page: Option<Page>,
}

impl NormalizationContext {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            viewer,
            ..Self::default()
        }
    }

    /// Take includes and fieldsets from parsed request parameters
    pub fn from_params(viewer: Viewer, params: &RequestParams) -> Self {
        Self {
            viewer,
            fieldsets: params.fields.clone(),
            includes: params.include.clone(),
            ..Self::default()
        }
    }

    pub fn with_includes<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fieldset<I, S>(mut self, type_name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fieldsets
            .insert(type_name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_request_url(mut self, url: impl Into<String>) -> Self {
        self.request_url = Some(url.into());
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    /// Whether targets reached by `path` are included.
    ///
    /// True when some include path is `path` itself or continues below it.
    pub fn is_include_active(&self, path: &str) -> bool {
        self.includes.iter().any(|include| {
            include == path
                || (include.starts_with(path) && include.as_bytes().get(path.len()) == Some(&b'.'))
        })
    }

    /// Whether an attribute survives the sparse fieldset of its type
    pub fn allows_attribute(&self, type_name: &str, field: &str) -> bool {
        self.fieldsets
            .get(type_name)
            .map_or(true, |allowed| allowed.contains(field))
    }

    /// Check every include path against the schema.
    ///
    /// Each segment must name a relationship on at least one of the types
    /// reached so far.
    pub fn validate_includes<S>(&self, schema: &S, root: &ResourceType, max_depth: usize) -> Result<()>
    where
        S: SchemaLookup + ?Sized,
    {
        for path in &self.includes {
            let segments: Vec<&str> = path.split('.').collect();
            if segments.len() > max_depth {
                return Err(Error::malformed(
                    "include",
                    format!("'{}' is deeper than {} levels", path, max_depth),
                ));
            }

            let mut types: BTreeSet<String> = BTreeSet::from([root.type_name.clone()]);
            for segment in segments {
                let mut next = BTreeSet::new();
                for type_name in &types {
                    let Ok(field) = schema.field_schema(type_name, segment) else {
                        continue;
                    };
                    if field.is_relationship {
                        next.extend(
                            field
                                .target_types
                                .iter()
                                .filter(|t| schema.is_serializable(t))
                                .cloned(),
                        );
                    }
                }
                if next.is_empty() {
                    return Err(Error::malformed(
                        "include",
                        format!("'{}' in '{}' is not a relationship field", segment, path),
                    ));
                }
                types = next;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, FieldSchema, SchemaRegistry};

    #[test]
    fn test_include_path_activity() {
        let ctx = NormalizationContext::default().with_includes(["author.picture", "tags"]);
        assert!(ctx.is_include_active("author"));
        assert!(ctx.is_include_active("author.picture"));
        assert!(ctx.is_include_active("tags"));
        assert!(!ctx.is_include_active("auth"));
        assert!(!ctx.is_include_active("tags.vocabulary"));
    }

    #[test]
    fn test_fieldsets_only_restrict_listed_types() {
        let ctx = NormalizationContext::default().with_fieldset("user", ["name"]);
        assert!(ctx.allows_attribute("user", "name"));
        assert!(!ctx.allows_attribute("user", "mail"));
        assert!(ctx.allows_attribute("article", "body"));
    }

    #[test]
    fn test_role_access() {
        let access = RoleAccess::new()
            .restrict_type("secret", "staff")
            .restrict_field("user", "mail", "staff");
        let user = Record::new("user", "7");
        let anon = Viewer::anonymous();
        let staff = Viewer::new("sam").with_role("staff");

        assert!(!access.can_view(&user, "mail", &anon));
        assert!(access.can_view(&user, "mail", &staff));
        assert!(access.can_view(&user, "name", &anon));
        assert!(!access.can_view_record(&Record::new("secret", "1"), &anon));
        assert!(access.can_view_record(&Record::new("secret", "1"), &Viewer::new("root").with_role(ADMIN_ROLE)));
    }

    #[test]
    fn test_validate_includes() {
        let schema = SchemaRegistry::builder()
            .register(
                ResourceType::new("article", "node", "article")
                    .with_field(FieldSchema::attribute("title"))
                    .with_field(FieldSchema::relationship("author", Cardinality::One, ["user"])),
            )
            .register(
                ResourceType::new("user", "user", "user")
                    .with_field(FieldSchema::relationship("picture", Cardinality::One, ["file"])),
            )
            .register(ResourceType::new("file", "file", "file"))
            .build()
            .unwrap();
        let article = schema.resource_type("article").unwrap();

        let ok = NormalizationContext::default().with_includes(["author.picture"]);
        assert!(ok.validate_includes(&*schema, article, 3).is_ok());
        assert!(ok.validate_includes(&*schema, article, 1).is_err());

        let bad = NormalizationContext::default().with_includes(["title"]);
        assert!(matches!(
            bad.validate_includes(&*schema, article, 3),
            Err(Error::MalformedQuery { key, .. }) if key == "include"
        ));
    }
}
