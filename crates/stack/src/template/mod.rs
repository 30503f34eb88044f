//! CloudFormation template model.
//!
//! Everything is kept in ordered maps so the same stack always renders to
//! the same bytes.

mod expr;

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Result, StackError};

pub use expr::{Expr, PSEUDO_ACCOUNT_ID, PSEUDO_PARTITION};

/// Number of hex characters in a logical ID suffix.
const LOGICAL_ID_HASH_LEN: usize = 8;

/// Path components that are dropped from the human part of a logical ID.
const HIDDEN_PATH_COMPONENTS: &[&str] = &["Resource", "Default"];

/// A synthesized template.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// Resources keyed by logical ID. Always emitted, even when empty.
    pub resources: BTreeMap<String, Resource>,
    /// Stack outputs.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    /// Resource type, e.g. `AWS::EC2::Instance`.
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(rename = "Properties", skip_serializing_if = "serde_json::Value::is_null")]
    pub properties: serde_json::Value,
    /// Logical IDs this resource must be created after.
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    /// Build a resource from typed properties.
    ///
    /// # Errors
    /// Returns an error if the properties cannot be serialized.
    pub fn new(resource_type: impl Into<String>, properties: &impl Serialize) -> Result<Self> {
        Ok(Self {
            resource_type: resource_type.into(),
            properties: serde_json::to_value(properties)?,
            depends_on: Vec::new(),
        })
    }

    /// Add creation-order dependencies. The list stays sorted and unique.
    #[must_use]
    pub fn depends_on<I, S>(mut self, logical_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(logical_ids.into_iter().map(Into::into));
        self.depends_on.sort();
        self.depends_on.dedup();
        self
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    /// Output value, usually only known after deploy.
    pub value: Expr,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Template {
    /// Create an empty template.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource.
    ///
    /// # Errors
    /// Returns [`StackError::DuplicateLogicalId`] if the ID is already taken.
    pub fn add_resource(
        &mut self,
        logical_id: impl Into<String>,
        resource: Resource,
    ) -> Result<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(StackError::DuplicateLogicalId(logical_id));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Add an output, replacing any previous output with the same name.
    pub fn add_output(&mut self, name: impl Into<String>, output: Output) {
        self.outputs.insert(name.into(), output);
    }

    /// Iterate over resources of one type.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    /// Render as pretty JSON with a trailing newline.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Derive a stable logical ID from a construct path.
///
/// The human-readable part keeps the alphanumeric characters of each path
/// component, except the `Resource`/`Default` leaves. The suffix is the first
/// eight hex digits of the SHA-256 of the full path, so two constructs with
/// the same human part still get distinct IDs.
#[must_use]
pub fn logical_id(path: &[&str]) -> String {
    let human: String = path
        .iter()
        .filter(|c| !HIDDEN_PATH_COMPONENTS.contains(*c))
        .flat_map(|c| c.chars().filter(char::is_ascii_alphanumeric))
        .collect();

    let digest = Sha256::digest(path.join("/").as_bytes());
    let suffix = hex::encode_upper(digest);

    format!("{human}{}", &suffix[..LOGICAL_ID_HASH_LEN])
}
