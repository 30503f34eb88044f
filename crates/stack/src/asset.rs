//! Content-addressed file assets.
//!
//! Each file is keyed by the SHA-256 of its bytes, so re-staging identical
//! content always lands on the same object and editing one file never moves
//! another file's key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, StackError};
use crate::template::{Expr, PSEUDO_ACCOUNT_ID};

/// Bootstrap qualifier of the staging bucket.
pub const DEFAULT_QUALIFIER: &str = "hnb659fds";

/// Asset manifest schema version.
pub const ASSET_MANIFEST_VERSION: &str = "21.0.0";

/// Packaging for single files uploaded verbatim.
const FILE_PACKAGING: &str = "file";

/// Name of the staging bucket for an environment.
///
/// Without a concrete account the bucket name is left for the deploy engine
/// to fill in through `Fn::Sub`.
#[must_use]
pub fn staging_bucket(account: Option<&str>, region: &str) -> Expr {
    match account {
        Some(account) => Expr::literal(format!(
            "cdk-{DEFAULT_QUALIFIER}-assets-{account}-{region}"
        )),
        None => Expr::Sub(format!(
            "cdk-{DEFAULT_QUALIFIER}-assets-${{{PSEUDO_ACCOUNT_ID}}}-{region}"
        )),
    }
}

/// A file staged to durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    id: String,
    source_path: PathBuf,
    hash: String,
    extension: String,
    bucket: Expr,
}

impl Asset {
    /// Hash `path` and register it for upload to `bucket`.
    ///
    /// # Errors
    /// Returns [`StackError::AssetRead`] if the file cannot be read.
    pub fn stage(id: impl Into<String>, path: impl AsRef<Path>, bucket: &Expr) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read(path).map_err(|source| StackError::AssetRead {
            path: path.to_path_buf(),
            source,
        })?;

        let asset = Self::from_contents(id, path, &contents, bucket);
        debug!(
            asset = %asset.id,
            path = %path.display(),
            hash = %asset.hash,
            "Staged asset"
        );
        Ok(asset)
    }

    /// Register already-loaded file contents.
    #[must_use]
    pub fn from_contents(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        contents: &[u8],
        bucket: &Expr,
    ) -> Self {
        let source_path = path.into();
        let extension = source_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        Self {
            id: id.into(),
            source_path,
            hash: hex::encode(Sha256::digest(contents)),
            extension,
            bucket: bucket.clone(),
        }
    }

    /// Construct id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local file the asset was read from.
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Lowercase hex SHA-256 of the file contents.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Bucket the asset is uploaded to.
    #[must_use]
    pub fn bucket(&self) -> &Expr {
        &self.bucket
    }

    /// Object key: the content hash plus the original extension.
    #[must_use]
    pub fn object_key(&self) -> String {
        format!("{}{}", self.hash, self.extension)
    }

    /// File name of the copy placed in the assembly directory.
    #[must_use]
    pub fn staged_file_name(&self) -> String {
        format!("asset.{}{}", self.hash, self.extension)
    }

    /// `s3://bucket/key` location, for display.
    #[must_use]
    pub fn s3_url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.object_key())
    }
}

/// Where a file is uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDestination {
    /// Bucket name, possibly with `${AWS::...}` placeholders.
    pub bucket_name: String,
    /// Object key.
    pub object_key: String,
}

/// Where a file comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSource {
    /// Path relative to the assembly directory.
    pub path: String,
    /// Packaging mode.
    pub packaging: String,
}

/// One file entry of the asset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAsset {
    /// Source in the assembly directory.
    pub source: FileSource,
    /// Upload destinations keyed by environment.
    pub destinations: BTreeMap<String, FileDestination>,
}

/// Manifest telling the deploy tool which files to upload before the
/// template is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    /// Schema version.
    pub version: String,
    /// File assets keyed by content hash.
    pub files: BTreeMap<String, FileAsset>,
    /// Container image assets (always empty for this stack).
    pub docker_images: BTreeMap<String, serde_json::Value>,
}

impl AssetManifest {
    /// Build the manifest for a set of staged assets.
    #[must_use]
    pub fn new(assets: &[Asset], account: Option<&str>, region: &str) -> Self {
        let destination_id = format!("{}-{region}", account.unwrap_or("current_account"));

        let files = assets
            .iter()
            .map(|asset| {
                let entry = FileAsset {
                    source: FileSource {
                        path: asset.staged_file_name(),
                        packaging: FILE_PACKAGING.to_string(),
                    },
                    destinations: BTreeMap::from([(
                        destination_id.clone(),
                        FileDestination {
                            bucket_name: asset.bucket().to_string(),
                            object_key: asset.object_key(),
                        },
                    )]),
                };
                (asset.hash().to_string(), entry)
            })
            .collect();

        Self {
            version: ASSET_MANIFEST_VERSION.to_string(),
            files,
            docker_images: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bucket() -> Expr {
        staging_bucket(Some("123456789012"), "ap-northeast-1")
    }

    #[test]
    fn test_staging_bucket_with_account() {
        assert_eq!(
            bucket(),
            Expr::literal("cdk-hnb659fds-assets-123456789012-ap-northeast-1")
        );
    }

    #[test]
    fn test_staging_bucket_without_account_defers_to_deploy() {
        assert_eq!(
            staging_bucket(None, "ap-northeast-1"),
            Expr::Sub("cdk-hnb659fds-assets-${AWS::AccountId}-ap-northeast-1".into())
        );
    }

    #[test]
    fn test_key_is_content_addressed() {
        let a = Asset::from_contents("A", "userdata/a.py", b"print('hi')\n", &bucket());
        let b = Asset::from_contents("B", "elsewhere/b.py", b"print('hi')\n", &bucket());
        let c = Asset::from_contents("C", "userdata/a.py", b"print('bye')\n", &bucket());

        assert_eq!(a.object_key(), b.object_key());
        assert_ne!(a.object_key(), c.object_key());
        assert_eq!(a.hash().len(), 64);
        assert!(a.object_key().ends_with(".py"));
        assert_eq!(a.staged_file_name(), format!("asset.{}.py", a.hash()));
    }

    #[test]
    fn test_extensionless_file() {
        let asset = Asset::from_contents("A", "userdata/README", b"x", &bucket());
        assert_eq!(asset.object_key(), asset.hash());
    }

    #[test]
    fn test_stage_reads_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(b"{}").unwrap();

        let staged = Asset::stage("Config", file.path(), &bucket()).unwrap();
        let expected = Asset::from_contents("Config", file.path(), b"{}", &bucket());
        assert_eq!(staged, expected);
    }

    #[test]
    fn test_stage_missing_file() {
        let err = Asset::stage("Missing", "/nonexistent/file.py", &bucket()).unwrap_err();
        assert!(matches!(err, StackError::AssetRead { .. }));
    }

    #[test]
    fn test_manifest_lists_each_file_once() {
        let a = Asset::from_contents("A", "a.py", b"a", &bucket());
        let b = Asset::from_contents("B", "b.service", b"b", &bucket());
        let manifest = AssetManifest::new(&[a.clone(), b], Some("123456789012"), "ap-northeast-1");

        assert_eq!(manifest.files.len(), 2);
        let entry = &manifest.files[a.hash()];
        assert_eq!(entry.source.packaging, "file");
        let destination = &entry.destinations["123456789012-ap-northeast-1"];
        assert_eq!(destination.object_key, a.object_key());
        assert_eq!(
            destination.bucket_name,
            "cdk-hnb659fds-assets-123456789012-ap-northeast-1"
        );
    }
}
