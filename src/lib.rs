// hyperdoc - hypermedia JSON documents over typed records
// Structured filter/sort compilation and document assembly

#![warn(rust_2018_idioms)]

pub mod config;
pub mod datum;
pub mod document;
pub mod links;
pub mod query;
pub mod schema;
pub mod storage;

// Re-exports for convenience
pub use config::Config;
pub use datum::Datum;
pub use document::{Document, DocumentAssembler, NormalizationContext, ResourceIdentifier};
pub use query::{QueryCompiler, QueryPlan, QueryTreeBuilder};
pub use schema::{SchemaLookup, SchemaRegistry};
pub use storage::{MemoryStore, Record};

/// hyperdoc error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Error {
        /// Structurally invalid filter/sort/include input
        #[error("Malformed query at '{key}': {reason}")]
        MalformedQuery { key: String, reason: String },

        /// A field that the resource type does not define
        #[error("Invalid query field '{field}' for resource type '{type_name}'")]
        InvalidQueryField { type_name: String, field: String },

        /// An operator outside the known set
        #[error("Invalid operator '{operator}' on field '{field}'")]
        InvalidOperator { field: String, operator: String },

        #[error("Access denied: {0}")]
        AccessDenied(String),

        #[error("Not found: {0}")]
        NotFound(String),

        #[error("Storage error: {0}")]
        Storage(String),

        /// Relationship write payload that does not fit the field
        #[error("Invalid relationship payload: {0}")]
        InvalidRelationship(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
            Error::MalformedQuery {
                key: key.into(),
                reason: reason.into(),
            }
        }

        /// Errors caused by the request rather than the server.
        pub fn is_client_error(&self) -> bool {
            matches!(
                self,
                Error::MalformedQuery { .. }
                    | Error::InvalidQueryField { .. }
                    | Error::InvalidOperator { .. }
                    | Error::AccessDenied(_)
                    | Error::InvalidRelationship(_)
            )
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::malformed("f1", "unknown shape").is_client_error());
        assert!(Error::InvalidOperator {
            field: "title".into(),
            operator: "~".into()
        }
        .is_client_error());
        assert!(!Error::Storage("disk".into()).is_client_error());
        assert!(!Error::NotFound("user/7".into()).is_client_error());
    }

    #[test]
    fn test_malformed_message_names_key() {
        let err = Error::malformed("g1", "parent group 'g9' does not exist");
        assert_eq!(
            err.to_string(),
            "Malformed query at 'g1': parent group 'g9' does not exist"
        );
    }
}
