//! Cloud assembly output.
//!
//! The assembly directory is what the deploy tool consumes: the template,
//! the asset manifest, a copy of every asset, and `manifest.json` listing the
//! artifacts and any lookups that still need answering.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::asset::AssetManifest;
use crate::error::{Result, StackError};
use crate::lookup::MissingLookup;
use crate::stack::SynthesizedStack;

/// Assembly schema version.
pub const ASSEMBLY_VERSION: &str = "21.0.0";

/// Name of the top-level manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";
const ASSET_MANIFEST_ARTIFACT_TYPE: &str = "cdk:asset-manifest";

/// An artifact entry in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    /// Artifact type.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// `aws://account/region`, for stacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Type-specific properties, e.g. the file name.
    pub properties: BTreeMap<String, String>,
    /// Artifacts that must be processed first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyManifest {
    /// Schema version.
    pub version: String,
    /// Artifacts by ID.
    pub artifacts: BTreeMap<String, ArtifactEntry>,
    /// Lookups the deploy tool must resolve before deploying.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingLookup>,
}

/// File name of a stack's template.
#[must_use]
pub fn template_file_name(stack_name: &str) -> String {
    format!("{stack_name}.template.json")
}

/// File name of a stack's asset manifest.
#[must_use]
pub fn asset_manifest_file_name(stack_name: &str) -> String {
    format!("{stack_name}.assets.json")
}

impl AssemblyManifest {
    /// Manifest for one synthesized stack.
    #[must_use]
    pub fn for_stack(stack: &SynthesizedStack) -> Self {
        let name = &stack.stack_name;
        let assets_id = format!("{name}.assets");
        let environment = format!(
            "aws://{}/{}",
            stack.env.account.as_deref().unwrap_or("unknown-account"),
            stack.env.region
        );

        let stack_entry = ArtifactEntry {
            artifact_type: STACK_ARTIFACT_TYPE.to_string(),
            environment: Some(environment),
            properties: BTreeMap::from([("templateFile".to_string(), template_file_name(name))]),
            dependencies: vec![assets_id.clone()],
        };
        let assets_entry = ArtifactEntry {
            artifact_type: ASSET_MANIFEST_ARTIFACT_TYPE.to_string(),
            environment: None,
            properties: BTreeMap::from([("file".to_string(), asset_manifest_file_name(name))]),
            dependencies: Vec::new(),
        };

        Self {
            version: ASSEMBLY_VERSION.to_string(),
            artifacts: BTreeMap::from([(name.clone(), stack_entry), (assets_id, assets_entry)]),
            missing: stack.missing.clone(),
        }
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    fs::write(path, json).map_err(|e| StackError::io(path, e))?;
    debug!(path = %path.display(), "Wrote assembly file");
    Ok(())
}

/// Write the assembly for `stack` into `out_dir`, creating it if needed.
///
/// Writing the same stack twice produces identical files.
///
/// # Errors
/// Returns an error if the directory cannot be created or a file cannot be
/// written or copied.
pub fn write(stack: &SynthesizedStack, out_dir: &Path) -> Result<AssemblyManifest> {
    fs::create_dir_all(out_dir).map_err(|e| StackError::io(out_dir, e))?;

    let template_path = out_dir.join(template_file_name(&stack.stack_name));
    fs::write(&template_path, stack.template.to_json_pretty()?)
        .map_err(|e| StackError::io(&template_path, e))?;

    let asset_manifest = AssetManifest::new(
        &stack.assets,
        stack.env.account.as_deref(),
        &stack.env.region,
    );
    write_json(
        &out_dir.join(asset_manifest_file_name(&stack.stack_name)),
        &asset_manifest,
    )?;

    for asset in &stack.assets {
        let staged: PathBuf = out_dir.join(asset.staged_file_name());
        fs::copy(asset.source_path(), &staged).map_err(|e| StackError::io(&staged, e))?;
        debug!(asset = %asset.id(), path = %staged.display(), "Copied asset");
    }

    let manifest = AssemblyManifest::for_stack(stack);
    write_json(&out_dir.join(MANIFEST_FILE), &manifest)?;

    info!(
        out_dir = %out_dir.display(),
        stack = %stack.stack_name,
        assets = stack.assets.len(),
        missing_lookups = manifest.missing.len(),
        "Cloud assembly written"
    );
    Ok(manifest)
}
