//! Document assembly
//!
//! # Architecture
//!
//! ```text
//! Record ──► ResourceNormalizer ──► ResourceValue (+ nested_includes)
//!                                        │
//!                         DocumentAssembler::flatten
//!                                        ▼
//!                       Document { data, included, links, cache_tags }
//!                                        │
//!                                   rasterize()
//!                                        ▼
//!                                   wire JSON
//! ```
//!
//! Normalization consults the schema for field kinds, an [`AccessCheck`]
//! for visibility and a [`RecordSource`](crate::storage::RecordSource) for
//! relationship targets on active include paths. Assembly moves every
//! nested include into a single `included` list, unique by identifier and
//! disjoint from the primary data.

pub mod assembler;
pub mod context;
pub mod normalizer;
pub mod value;

pub use assembler::{Document, DocumentAssembler, DocumentLinks, PrimaryData};
pub use context::{AccessCheck, AllowAll, NormalizationContext, RoleAccess, Viewer};
pub use normalizer::ResourceNormalizer;
pub use value::{FieldValue, ResourceIdentifier, ResourceLinks, ResourceValue};
