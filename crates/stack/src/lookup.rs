//! Network lookups resolved from a cached context file.
//!
//! Synthesis never calls cloud APIs. A VPC is resolved from a cached
//! lookup result keyed the same way the deploy toolkit keys them. When the
//! cache has no entry, the lookup is recorded as missing and a placeholder
//! network is used so synthesis can finish. The deploy tool then performs the
//! lookup, fills the cache and synthesizes again. An ID that does not
//! resolve to a real VPC is reported by that tool, not here.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aws::SubnetType;
use crate::error::{Result, StackError};

/// Context provider name for VPC lookups.
pub const VPC_PROVIDER: &str = "vpc-provider";

/// Build the cache key of a VPC lookup.
#[must_use]
pub fn vpc_lookup_key(account: &str, region: &str, vpc_id: &str) -> String {
    format!(
        "{VPC_PROVIDER}:account={account}:filter.vpc-id={vpc_id}:region={region}:returnAsymmetricSubnets=true"
    )
}

/// Cached lookup results, usually `stack.context.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextCache {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ContextCache {
    /// Load the cache. A missing file is an empty cache.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No context cache, starting empty");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| StackError::io(path, e))?;
        let cache: Self = serde_json::from_str(&content)?;
        info!(path = %path.display(), entries = cache.entries.len(), "Loaded context cache");
        Ok(cache)
    }

    /// Store a lookup result.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }

    /// Cached value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }
}

/// A lookup the cache could not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingLookup {
    /// Cache key the result should be stored under.
    pub key: String,
    /// Context provider that can answer it.
    pub provider: String,
    /// Query parameters.
    pub props: BTreeMap<String, String>,
}

/// A subnet of a looked-up VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Subnet ID.
    pub subnet_id: String,
    /// Availability zone.
    pub availability_zone: String,
    /// IPv4 CIDR.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    /// Route table ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
}

/// Subnets of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroup {
    /// Group name.
    pub name: String,
    /// Group type.
    #[serde(rename = "type")]
    pub subnet_type: SubnetType,
    /// Member subnets.
    pub subnets: Vec<Subnet>,
}

/// An existing VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// VPC ID.
    pub vpc_id: String,
    /// Availability zones the VPC spans.
    #[serde(default)]
    pub availability_zones: Vec<String>,
    /// Subnet groups.
    #[serde(default)]
    pub subnet_groups: Vec<SubnetGroup>,
}

impl Network {
    /// Stand-in used while a lookup is pending.
    ///
    /// Keeps the requested VPC ID so the rest of the stack still refers to it.
    #[must_use]
    pub fn placeholder(vpc_id: impl Into<String>) -> Self {
        let group = |name: &str, subnet_type, prefix: &str| SubnetGroup {
            name: name.to_string(),
            subnet_type,
            subnets: [("12345", "dummy1a"), ("67890", "dummy1b")]
                .into_iter()
                .map(|(suffix, az)| Subnet {
                    subnet_id: format!("{prefix}-{suffix}"),
                    availability_zone: az.to_string(),
                    cidr: None,
                    route_table_id: None,
                })
                .collect(),
        };

        Self {
            vpc_id: vpc_id.into(),
            availability_zones: Vec::new(),
            subnet_groups: vec![
                group("Public", SubnetType::Public, "s"),
                group("Private", SubnetType::Private, "p"),
            ],
        }
    }

    /// First subnet of the requested type.
    ///
    /// # Errors
    /// Returns [`StackError::NoSubnetsOfType`] if the VPC has none.
    pub fn select_subnet(&self, subnet_type: SubnetType) -> Result<&Subnet> {
        self.subnet_groups
            .iter()
            .filter(|g| g.subnet_type == subnet_type)
            .flat_map(|g| g.subnets.iter())
            .next()
            .ok_or_else(|| StackError::NoSubnetsOfType {
                wanted: subnet_type.to_string(),
                available: self
                    .subnet_groups
                    .iter()
                    .filter(|g| !g.subnets.is_empty())
                    .map(|g| g.subnet_type.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Resolves lookups against a cache and remembers the ones it could not.
#[derive(Debug)]
pub struct Lookups<'a> {
    cache: &'a ContextCache,
    missing: Vec<MissingLookup>,
}

impl<'a> Lookups<'a> {
    /// Start resolving against `cache`.
    #[must_use]
    pub fn new(cache: &'a ContextCache) -> Self {
        Self {
            cache,
            missing: Vec::new(),
        }
    }

    /// Resolve an existing VPC by ID.
    ///
    /// # Errors
    /// Returns [`StackError::EnvironmentRequired`] without a concrete account,
    /// or an error if the cached entry is malformed.
    pub fn vpc(&mut self, account: Option<&str>, region: &str, vpc_id: &str) -> Result<Network> {
        let account = account
            .ok_or_else(|| StackError::EnvironmentRequired(format!("VPC lookup of {vpc_id}")))?;
        let key = vpc_lookup_key(account, region, vpc_id);

        if let Some(cached) = self.cache.get(&key) {
            let network: Network = serde_json::from_value(cached.clone())?;
            debug!(vpc_id = %network.vpc_id, "Resolved VPC from context cache");
            return Ok(network);
        }

        warn!(key = %key, "VPC lookup not cached, using placeholder network");
        self.missing.push(MissingLookup {
            key,
            provider: VPC_PROVIDER.to_string(),
            props: BTreeMap::from([
                ("account".to_string(), account.to_string()),
                ("region".to_string(), region.to_string()),
                ("filter.vpc-id".to_string(), vpc_id.to_string()),
                ("returnAsymmetricSubnets".to_string(), "true".to_string()),
            ]),
        });
        Ok(Network::placeholder(vpc_id))
    }

    /// Lookups that still need answering.
    #[must_use]
    pub fn into_missing(self) -> Vec<MissingLookup> {
        self.missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cached_vpc() -> serde_json::Value {
        json!({
            "vpcId": "vpc-1",
            "availabilityZones": ["ap-northeast-1a"],
            "subnetGroups": [
                {
                    "name": "Public",
                    "type": "Public",
                    "subnets": [{"subnetId": "subnet-pub", "availabilityZone": "ap-northeast-1a"}]
                },
                {
                    "name": "Private",
                    "type": "Private",
                    "subnets": [
                        {"subnetId": "subnet-priv-a", "availabilityZone": "ap-northeast-1a", "cidr": "10.0.1.0/24"},
                        {"subnetId": "subnet-priv-c", "availabilityZone": "ap-northeast-1c"}
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_lookup_key_format() {
        assert_eq!(
            vpc_lookup_key("123", "ap-northeast-1", "vpc-1"),
            "vpc-provider:account=123:filter.vpc-id=vpc-1:region=ap-northeast-1:returnAsymmetricSubnets=true"
        );
    }

    #[test]
    fn test_cached_vpc_resolves() {
        let mut cache = ContextCache::default();
        cache.insert(vpc_lookup_key("123", "ap-northeast-1", "vpc-1"), cached_vpc());

        let mut lookups = Lookups::new(&cache);
        let network = lookups.vpc(Some("123"), "ap-northeast-1", "vpc-1").unwrap();
        assert_eq!(network.vpc_id, "vpc-1");
        assert_eq!(
            network.select_subnet(SubnetType::Private).unwrap().subnet_id,
            "subnet-priv-a"
        );
        assert_eq!(
            network.select_subnet(SubnetType::Public).unwrap().subnet_id,
            "subnet-pub"
        );
        assert!(lookups.into_missing().is_empty());
    }

    #[test]
    fn test_uncached_vpc_is_recorded_and_placeholder_used() {
        let cache = ContextCache::default();
        let mut lookups = Lookups::new(&cache);
        let network = lookups.vpc(Some("123"), "ap-northeast-1", "vpc-9").unwrap();

        assert_eq!(network.vpc_id, "vpc-9");
        assert_eq!(
            network.select_subnet(SubnetType::Private).unwrap().subnet_id,
            "p-12345"
        );

        let missing = lookups.into_missing();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].provider, VPC_PROVIDER);
        assert_eq!(missing[0].props["filter.vpc-id"], "vpc-9");
    }

    #[test]
    fn test_lookup_requires_account() {
        let cache = ContextCache::default();
        let mut lookups = Lookups::new(&cache);
        let err = lookups.vpc(None, "ap-northeast-1", "vpc-1").unwrap_err();
        assert!(matches!(err, StackError::EnvironmentRequired(_)));
    }

    #[test]
    fn test_no_subnets_of_type() {
        let network = Network::placeholder("vpc-1");
        let err = network.select_subnet(SubnetType::Isolated).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There are no 'Isolated' subnet groups in this VPC. Available types: Public, Private"
        );
    }

    #[test]
    fn test_cache_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContextCache::load(&dir.path().join("stack.context.json")).unwrap();
        assert_eq!(cache, ContextCache::default());
    }

    #[test]
    fn test_cache_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.context.json");
        let key = vpc_lookup_key("123", "ap-northeast-1", "vpc-1");
        std::fs::write(&path, json!({ key.clone(): cached_vpc() }).to_string()).unwrap();

        let cache = ContextCache::load(&path).unwrap();
        assert_eq!(cache.get(&key), Some(&cached_vpc()));
    }
}
