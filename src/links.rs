//! Link generation
//!
//! Resource objects carry a `self` link and a `type` link; collection
//! documents additionally get `next`/`prev` when paginated.

use crate::document::ResourceIdentifier;

/// Builds the URLs placed in `links` blocks
pub trait LinkBuilder {
    fn self_link(&self, identifier: &ResourceIdentifier) -> String;

    fn type_link(&self, type_name: &str) -> String;
}

/// `{base}/{entity}/{bundle}/{id}` from type names of the form `entity--bundle`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultLinkBuilder {
    base_url: String,
}

impl DefaultLinkBuilder {
    pub const fn empty() -> Self {
        Self {
            base_url: String::new(),
        }
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl LinkBuilder for DefaultLinkBuilder {
    fn self_link(&self, identifier: &ResourceIdentifier) -> String {
        format!("{}/{}", self.type_link(&identifier.type_name), identifier.id)
    }

    fn type_link(&self, type_name: &str) -> String {
        format!("{}/{}", self.base_url, type_name.replace("--", "/"))
    }
}

/// Rewrite a URL's `page[offset]`/`page[limit]` parameters
pub fn paged_link(url: &str, offset: usize, limit: usize) -> String {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let mut pairs: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let key = p.split('=').next().unwrap_or_default();
            !(key.starts_with("page[") || key.starts_with("page%5B"))
        })
        .collect();

    let offset = format!("page[offset]={}", offset);
    let limit = format!("page[limit]={}", limit);
    pairs.push(&offset);
    pairs.push(&limit);
    format!("{}?{}", path, pairs.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_links_split_type_name() {
        let links = DefaultLinkBuilder::new("http://example.com/api/");
        let id = ResourceIdentifier::new("node--article", "1");
        assert_eq!(links.self_link(&id), "http://example.com/api/node/article/1");
        assert_eq!(links.type_link("user"), "http://example.com/api/user");
    }

    #[test]
    fn test_paged_link_replaces_page_params() {
        assert_eq!(
            paged_link("/api/article?sort=-created&page[offset]=0&page[limit]=10", 10, 10),
            "/api/article?sort=-created&page[offset]=10&page[limit]=10"
        );
        assert_eq!(paged_link("/api/article", 5, 5), "/api/article?page[offset]=5&page[limit]=5");
    }
}
