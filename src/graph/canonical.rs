//! Canonicalization of resolver identifiers into knowledge-graph packages.
//!
//! The resolver spells systems in upper case (`NPM`, `GO`) and packs
//! ecosystem structure into the name (`@scope/pkg`, `group:artifact`,
//! `github.com/org/mod`). The knowledge graph wants a lower-case type with
//! the namespace split out.

use crate::graph::bundled::{self, DecodedName};
use crate::model::{GraphNode, PackageSpec, VersionKey};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("Empty {field} in {key}")]
    EmptyField { field: &'static str, key: VersionKey },
    #[error("Maven name '{0}' is not of the form group:artifact")]
    MavenCoordinates(String),
}

/// Maps a resolver system name to the knowledge graph's package type.
pub fn package_type(system: &str) -> String {
    match system.to_ascii_uppercase().as_str() {
        "NPM" => "npm".to_string(),
        "PYPI" => "pypi".to_string(),
        "MAVEN" => "maven".to_string(),
        "GO" => "golang".to_string(),
        "CARGO" => "cargo".to_string(),
        "NUGET" => "nuget".to_string(),
        _ => system.to_ascii_lowercase(),
    }
}

/// PEP 503 name normalisation.
fn normalize_pypi(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_run {
                out.push('-');
            }
            in_run = true;
        } else {
            out.extend(c.to_lowercase());
            in_run = false;
        }
    }
    out
}

/// Splits `name` into (namespace, name) according to the package type.
fn split_name(pkg_type: &str, name: &str) -> Result<(Option<String>, String), CanonicalError> {
    match pkg_type {
        "npm" => match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
            Some((scope, local)) => Ok((Some(format!("@{}", scope)), local.to_string())),
            None => Ok((None, name.to_string())),
        },
        "maven" => match name.split_once(':') {
            Some((group, artifact)) if !group.is_empty() && !artifact.is_empty() => {
                Ok((Some(group.to_string()), artifact.to_string()))
            }
            _ => Err(CanonicalError::MavenCoordinates(name.to_string())),
        },
        "pypi" => Ok((None, normalize_pypi(name))),
        "golang" => match name.rsplit_once('/') {
            Some((ns, local)) => Ok((Some(ns.to_string()), local.to_string())),
            None => Ok((None, name.to_string())),
        },
        _ => Ok((None, name.to_string())),
    }
}

fn build_spec(
    key: &VersionKey,
    local_name: &str,
    scope: Vec<String>,
) -> Result<PackageSpec, CanonicalError> {
    let version = key.version.trim();
    if local_name.trim().is_empty() {
        return Err(CanonicalError::EmptyField {
            field: "name",
            key: key.clone(),
        });
    }
    if version.is_empty() {
        return Err(CanonicalError::EmptyField {
            field: "version",
            key: key.clone(),
        });
    }
    let pkg_type = package_type(&key.system);
    let (namespace, name) = split_name(&pkg_type, local_name.trim())?;
    Ok(PackageSpec {
        pkg_type,
        namespace,
        name,
        version: version.to_string(),
        scope,
    })
}

/// Canonicalizes a globally named package version.
pub fn canonicalize(key: &VersionKey) -> Result<PackageSpec, CanonicalError> {
    build_spec(key, &key.name, Vec::new())
}

/// Canonicalizes a graph node, decoding its name first when the resolver
/// flagged it as bundled.
pub fn canonicalize_node(node: &GraphNode) -> Result<PackageSpec, CanonicalError> {
    if !node.bundled {
        return canonicalize(&node.version_key);
    }
    let DecodedName {
        scope, local_name, ..
    } = bundled::decode(&node.version_key.name);
    build_spec(&node.version_key, &local_name, scope)
}
