//! Decoding of synthetic bundled dependency names.
//!
//! The resolver flattens the path of a vendored dependency into its name:
//! `a>1.2.3>b>c` is the package `c` bundled under `b`, itself bundled inside
//! `a@1.2.3`. Decoding yields the scope path and the local name once, so the
//! rest of the collector never has to re-parse the string.

use serde::{Deserialize, Serialize};

pub const SCOPE_SEPARATOR: char = '>';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedName {
    pub is_bundled: bool,

    /// `[rootName, rootVersion, intermediate names...]`; empty when not bundled
    pub scope: Vec<String>,

    pub local_name: String,
}

impl DecodedName {
    /// Rebuilds the encoded name.
    pub fn encode(&self) -> String {
        if self.scope.is_empty() {
            return self.local_name.clone();
        }
        let mut name = self.scope.join(">");
        name.push(SCOPE_SEPARATOR);
        name.push_str(&self.local_name);
        name
    }
}

/// Splits a resolver name into scope path and local name.
///
/// Intermediate names are not checked against the graph.
pub fn decode(name: &str) -> DecodedName {
    match name.rsplit_once(SCOPE_SEPARATOR) {
        Some((scope, local)) => DecodedName {
            is_bundled: true,
            scope: scope.split(SCOPE_SEPARATOR).map(str::to_string).collect(),
            local_name: local.to_string(),
        },
        None => DecodedName {
            is_bundled: false,
            scope: Vec::new(),
            local_name: name.to_string(),
        },
    }
}
