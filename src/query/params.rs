//! Request parameter parsing.
//!
//! Query strings arrive as flat `key=value` pairs with bracketed keys
//! (`filter[f1][path]=title`, `fields[user]=name,mail`, `page[limit]=10`).
//! [`RequestParams::from_pairs`] nests them back into the structures the
//! tree builder and the assembler consume.

use super::expression::Page;
use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Parsed collection request parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    /// Raw filter entries, keyed by identifier
    pub filter: Option<Value>,
    pub sort: Option<Value>,
    /// Dotted include paths
    pub include: Vec<String>,
    /// Sparse fieldsets: type name to allowed fields
    pub fields: HashMap<String, HashSet<String>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl RequestParams {
    /// Parse a raw (percent-encoded) query string
    pub fn from_query_string(query: &str) -> Result<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut pairs = Vec::new();
        for part in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            pairs.push((decode(key)?, decode(value)?));
        }
        Self::from_pairs(pairs)
    }

    /// Build from decoded `key=value` pairs, in request order
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut tree = Map::new();
        for (key, value) in pairs {
            let key = key.as_ref();
            let path = split_key(key)?;
            insert_path(&mut tree, key, &path, Value::String(value.into()))?;
        }

        let mut params = RequestParams::default();

        if let Some(filter) = tree.remove("filter") {
            params.filter = Some(expand_filter(filter)?);
        }

        params.sort = tree.remove("sort");

        match tree.remove("include") {
            None => {}
            Some(Value::String(raw)) => params.include = split_list(&raw),
            Some(_) => return Err(Error::malformed("include", "expected a comma separated list")),
        }

        match tree.remove("fields") {
            None => {}
            Some(Value::Object(types)) => {
                for (type_name, list) in types {
                    let Value::String(list) = list else {
                        return Err(Error::malformed(
                            format!("fields[{}]", type_name),
                            "expected a comma separated list",
                        ));
                    };
                    params
                        .fields
                        .insert(type_name, split_list(&list).into_iter().collect());
                }
            }
            Some(_) => return Err(Error::malformed("fields", "expected fields[TYPE]=a,b")),
        }

        match tree.remove("page") {
            None => {}
            Some(Value::Object(page)) => {
                params.offset = page_number(&page, "offset")?;
                params.limit = page_number(&page, "limit")?;
            }
            Some(_) => return Err(Error::malformed("page", "expected page[offset] or page[limit]")),
        }

        Ok(params)
    }

    /// Resolve the requested window, applying the default and maximum limit
    pub fn page(&self, default_limit: usize, max_limit: usize) -> Result<Page> {
        let limit = self.limit.unwrap_or(default_limit);
        if limit == 0 {
            return Err(Error::malformed("page[limit]", "limit must be positive"));
        }
        if limit > max_limit {
            return Err(Error::malformed(
                "page[limit]",
                format!("limit {} exceeds the maximum of {}", limit, max_limit),
            ));
        }
        Ok(Page {
            offset: self.offset.unwrap_or(0),
            limit,
        })
    }
}

fn decode(raw: &str) -> Result<String> {
    let raw = raw.replace('+', " ");
    percent_decode_str(&raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::malformed(raw.clone(), format!("invalid UTF-8: {}", e)))
}

/// `filter[f1][path]` -> `["filter", "f1", "path"]`; `[]` yields an empty segment
fn split_key(key: &str) -> Result<Vec<String>> {
    let (head, mut rest) = match key.find('[') {
        Some(pos) => key.split_at(pos),
        None => return Ok(vec![key.to_string()]),
    };

    let mut path = vec![head.to_string()];
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.split_once(']'))
            .ok_or_else(|| Error::malformed(key, "unbalanced brackets"))?;
        path.push(inner.0.to_string());
        rest = inner.1;
    }
    Ok(path)
}

fn insert_path(node: &mut Map<String, Value>, key: &str, path: &[String], value: Value) -> Result<()> {
    let Some((head, tail)) = path.split_first() else {
        return Ok(());
    };

    if tail.is_empty() {
        if node.contains_key(head) {
            return Err(Error::malformed(key, "parameter given more than once"));
        }
        node.insert(head.clone(), value);
        return Ok(());
    }

    // `key[]=a&key[]=b` collects into a list
    if tail.len() == 1 && tail[0].is_empty() {
        let entry = node
            .entry(head.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        return match entry {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(Error::malformed(key, "conflicts with an earlier parameter")),
        };
    }

    let entry = node
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    match entry {
        Value::Object(child) => insert_path(child, key, tail, value),
        _ => Err(Error::malformed(key, "conflicts with an earlier parameter")),
    }
}

/// Shorthand `filter[status]=1` means an equality condition on `status`,
/// and `filter[status][]=1&filter[status][]=2` a membership condition
fn expand_filter(filter: Value) -> Result<Value> {
    let Value::Object(entries) = filter else {
        return Err(Error::malformed("filter", "expected filter[ID][...] parameters"));
    };

    let expanded = entries
        .into_iter()
        .map(|(id, entry)| match entry {
            Value::String(_) | Value::Array(_) => {
                let mut condition = Map::new();
                condition.insert("path".into(), Value::String(id.clone()));
                if entry.is_array() {
                    condition.insert("operator".into(), Value::String("IN".into()));
                }
                condition.insert("value".into(), entry);
                (id, Value::Object(condition))
            }
            other => (id, other),
        })
        .collect();
    Ok(Value::Object(expanded))
}

fn page_number(page: &Map<String, Value>, name: &str) -> Result<Option<usize>> {
    match page.get(name) {
        None => Ok(None),
        Some(Value::String(raw)) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::malformed(format!("page[{}]", name), "expected a non-negative integer")),
        Some(_) => Err(Error::malformed(format!("page[{}]", name), "expected a number")),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_filter_pairs() {
        let params = RequestParams::from_pairs([
            ("filter[g1][group][conjunction]", "OR"),
            ("filter[f1][condition][path]", "status"),
            ("filter[f1][condition][value]", "1"),
            ("filter[f1][condition][memberOf]", "g1"),
        ])
        .unwrap();

        assert_eq!(
            params.filter,
            Some(json!({
                "g1": {"group": {"conjunction": "OR"}},
                "f1": {"condition": {"path": "status", "value": "1", "memberOf": "g1"}}
            }))
        );
    }

    #[test]
    fn test_shorthand_filter_and_lists() {
        let params = RequestParams::from_pairs([
            ("filter[status]", "1"),
            ("filter[f2][condition][path]", "tags"),
            ("filter[f2][condition][operator]", "IN"),
            ("filter[f2][condition][value][]", "a"),
            ("filter[f2][condition][value][]", "b"),
        ])
        .unwrap();

        let filter = params.filter.unwrap();
        assert_eq!(filter["status"], json!({"path": "status", "value": "1"}));
        assert_eq!(filter["f2"]["condition"]["value"], json!(["a", "b"]));
    }

    #[test]
    fn test_shorthand_list_becomes_membership() {
        let params = RequestParams::from_query_string("filter[status][]=1&filter[status][]=2").unwrap();

        let filter = params.filter.unwrap();
        assert_eq!(
            filter["status"],
            json!({"path": "status", "operator": "IN", "value": ["1", "2"]})
        );
    }

    #[test]
    fn test_include_fields_sort_page() {
        let params = RequestParams::from_query_string(
            "?include=author,tags.vocabulary&fields%5Buser%5D=name,mail&sort=-created&page[offset]=20&page[limit]=10",
        )
        .unwrap();

        assert_eq!(params.include, vec!["author", "tags.vocabulary"]);
        assert!(params.fields["user"].contains("mail"));
        assert_eq!(params.sort, Some(json!("-created")));
        assert_eq!(params.page(50, 50).unwrap(), Page { offset: 20, limit: 10 });
    }

    #[test]
    fn test_page_limits() {
        let params = RequestParams::default();
        assert_eq!(params.page(50, 100).unwrap(), Page { offset: 0, limit: 50 });

        let params = RequestParams::from_pairs([("page[limit]", "500")]).unwrap();
        assert!(matches!(params.page(50, 100), Err(Error::MalformedQuery { .. })));

        assert!(RequestParams::from_pairs([("page[offset]", "-1")]).is_err());
    }

    #[test]
    fn test_conflicting_keys_rejected() {
        let err = RequestParams::from_pairs([("filter[f1]", "x"), ("filter[f1][path]", "title")])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedQuery { key, .. } if key == "filter[f1][path]"));

        assert!(RequestParams::from_pairs([("filter[f1", "x")]).is_err());
    }
}
