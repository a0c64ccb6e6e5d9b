//! Graph module - reconstruction and identity of resolved dependency graphs.
//!
//! - **Builder**: [`builder::build`] validates the resolver's flat lists
//! - **Bundled names**: [`bundled::decode`] splits `a>1.2.3>b` scope paths
//! - **Canonicalizer**: [`canonical::canonicalize_node`] produces the
//!   knowledge graph's package identifiers

pub mod builder;
pub mod bundled;
pub mod canonical;

pub use builder::{build, from_response, MalformedGraphError};
pub use bundled::{decode, DecodedName};
pub use canonical::{canonicalize, canonicalize_node, CanonicalError};
