//! Stack configuration.
//!
//! Settings live in `stack.json` next to the repository root. Relative paths
//! in the file are resolved against the file's directory. Context values can
//! be overridden on the command line, and the account and region can come
//! from the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aws::{InstanceType, SubnetType};
use crate::error::{Result, StackError};
use crate::stack::{StackInputs, StackProps};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "stack.json";

/// Default stack name.
pub const DEFAULT_STACK_NAME: &str = "CdkEc2DebianStack";

/// Default target region.
pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Environment variable naming the target account.
pub const ENV_ACCOUNT: &str = "CDK_DEFAULT_ACCOUNT";

/// Environment variable naming the target region.
pub const ENV_REGION: &str = "CDK_DEFAULT_REGION";

fn default_stack_name() -> String {
    DEFAULT_STACK_NAME.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_image_regions() -> Vec<String> {
    vec![DEFAULT_REGION.to_string()]
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("userdata")
}

fn default_context_file() -> PathBuf {
    PathBuf::from("stack.context.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("stack.out")
}

/// Target account and region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEnv {
    /// Account ID. Lookups need it; without it the staging bucket is left to
    /// the deploy engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Region.
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for StackEnv {
    fn default() -> Self {
        Self {
            account: None,
            region: default_region(),
        }
    }
}

impl StackEnv {
    /// Environment with a concrete account.
    #[must_use]
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: region.into(),
        }
    }
}

/// Contents of `stack.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackConfig {
    /// Stack name.
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    /// Target environment.
    #[serde(default)]
    pub env: StackEnv,
    /// Instance size.
    #[serde(default)]
    pub instance_type: InstanceType,
    /// Subnet type to place the instance in.
    #[serde(default)]
    pub subnet_type: SubnetType,
    /// Regions the `ami_id` context value is valid in.
    #[serde(default = "default_image_regions")]
    pub image_regions: Vec<String>,
    /// Directory holding the host files.
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,
    /// Cached lookup results.
    #[serde(default = "default_context_file")]
    pub context_file: PathBuf,
    /// Where the assembly is written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Context values, including the four stack inputs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            env: StackEnv::default(),
            instance_type: InstanceType::default(),
            subnet_type: SubnetType::default(),
            image_regions: default_image_regions(),
            asset_dir: default_asset_dir(),
            context_file: default_context_file(),
            output_dir: default_output_dir(),
            context: BTreeMap::new(),
        }
    }
}

impl StackConfig {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults, with paths relative to the
    /// file's would-be directory.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| StackError::io(path, e))?;
            let config: Self = serde_json::from_str(&content)?;
            info!(path = %path.display(), stack = %config.stack_name, "Loaded stack config");
            config
        } else {
            debug!(path = %path.display(), "No stack config, using defaults");
            Self::default()
        };

        Ok(config.relative_to(base))
    }

    /// Resolve relative paths against `base`.
    #[must_use]
    pub fn relative_to(mut self, base: &Path) -> Self {
        for path in [
            &mut self.asset_dir,
            &mut self.context_file,
            &mut self.output_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Apply `key=value` context overrides.
    ///
    /// # Errors
    /// Returns [`StackError::Config`] for an override without `=` or with an
    /// empty key.
    pub fn with_context_overrides<I, S>(mut self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in overrides {
            let raw = raw.as_ref();
            let (key, value) = raw
                .split_once('=')
                .filter(|(k, _)| !k.trim().is_empty())
                .ok_or_else(|| {
                    StackError::Config(format!("context override must be key=value, got '{raw}'"))
                })?;
            debug!(key = %key.trim(), "Context override");
            self.context.insert(key.trim().to_string(), value.to_string());
        }
        Ok(self)
    }

    /// Override the account and region when given.
    #[must_use]
    pub fn with_env(mut self, account: Option<String>, region: Option<String>) -> Self {
        if account.is_some() {
            self.env.account = account;
        }
        if let Some(region) = region {
            self.env.region = region;
        }
        self
    }

    /// Override the account and region from `CDK_DEFAULT_ACCOUNT` and
    /// `CDK_DEFAULT_REGION`. Unset or empty variables leave the file values.
    #[must_use]
    pub fn with_process_env(self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        self.with_env(var(ENV_ACCOUNT), var(ENV_REGION))
    }

    /// The four stack inputs, if supplied.
    ///
    /// # Errors
    /// Returns an error if only some of them are supplied.
    pub fn inputs(&self) -> Result<Option<StackInputs>> {
        StackInputs::from_context(&self.context)
    }

    /// Stack properties derived from this configuration.
    #[must_use]
    pub fn props(&self) -> StackProps {
        StackProps {
            env: self.env.clone(),
            instance_type: self.instance_type.clone(),
            subnet_type: self.subnet_type,
            image_regions: self.image_regions.clone(),
            asset_dir: self.asset_dir.clone(),
        }
    }
}
