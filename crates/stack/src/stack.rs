//! The Debian web host stack.
//!
//! One EC2 instance in an existing VPC. At first boot it installs the AWS
//! CLI and the `CloudWatch` agent, fetches three staged files, starts a
//! Tornado service under systemd and then starts the agent.
//!
//! Assembly order matters in one place: the role is built with every read
//! grant before the instance is declared, and the instance depends on the
//! role's policy, so the files are readable when the boot script runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::asset::{staging_bucket, Asset};
use crate::aws::ec2::{InstanceProperties, Tag, ATTR_PRIVATE_IP, ATTR_PUBLIC_IP};
use crate::aws::iam::{CLOUDWATCH_AGENT_SERVER_POLICY, EC2_SERVICE_PRINCIPAL};
use crate::aws::{
    InstanceType, MachineImage, ManagedPolicy, RoleBuilder, SecurityGroup, SubnetType,
};
use crate::config::StackEnv;
use crate::error::{Result, StackError};
use crate::lookup::{ContextCache, Lookups, MissingLookup, Network};
use crate::template::{logical_id, Expr, Output, Template};
use crate::user_data::ProvisioningScript;

/// Context key of the VPC ID.
pub const CONTEXT_VPC_ID: &str = "vpc_id";
/// Context key of the AMI ID.
pub const CONTEXT_AMI_ID: &str = "ami_id";
/// Context key of the key pair name.
pub const CONTEXT_KEY_NAME: &str = "key_name";
/// Context key of the security group ID.
pub const CONTEXT_SECURITY_GROUP_ID: &str = "securitygroup_id";

/// Output holding the instance's private address.
pub const OUTPUT_PRIVATE_IP: &str = "PrivateIp";
/// Output holding the instance's public address.
pub const OUTPUT_PUBLIC_IP: &str = "PublicIp";

const INSTANCE_ID: &str = "Instance";
const ROLE_ID: &str = "Role";

/// A file the instance fetches at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFile {
    /// Construct id of the asset.
    pub id: &'static str,
    /// File name under the asset directory.
    pub file_name: &'static str,
    /// Where the boot script writes it.
    pub destination: &'static str,
}

/// The Tornado server script.
pub const SERVER_SCRIPT: HostFile = HostFile {
    id: "PythonAsset",
    file_name: "tornado_server.py",
    destination: "/opt/tornado_server.py",
};

/// The systemd unit running the server.
pub const SERVICE_UNIT: HostFile = HostFile {
    id: "ServiceAsset",
    file_name: "tornado.service",
    destination: "/etc/systemd/system/tornado.service",
};

/// The `CloudWatch` agent configuration.
pub const AGENT_CONFIG: HostFile = HostFile {
    id: "AgentAsset",
    file_name: "cloudwatch-agent-config.json",
    destination: "/opt/aws/amazon-cloudwatch-agent/bin/config.json",
};

/// Files staged for the host, in fetch order.
pub const HOST_FILES: [HostFile; 3] = [SERVER_SCRIPT, SERVICE_UNIT, AGENT_CONFIG];

/// Tooling installed before any staged file is fetched.
const INSTALL_TOOLS: &[&str] = &[
    "apt update",
    "apt upgrade -y",
    "apt install unzip -y",
    "apt install python3-pip -y",
    r#"curl "https://awscli.amazonaws.com/awscli-exe-linux-x86_64.zip" -o "awscliv2.zip""#,
    "unzip awscliv2.zip",
    "./aws/install",
    "wget https://s3.amazonaws.com/amazoncloudwatch-agent/debian/amd64/latest/amazon-cloudwatch-agent.deb",
    "dpkg -i -E ./amazon-cloudwatch-agent.deb",
];

/// Runtime, service and agent start-up, after the files are in place.
/// The agent start must stay last.
const START_SERVICES: &[&str] = &[
    "python3 -m pip install tornado",
    "chmod 644 /etc/systemd/system/tornado.service",
    "systemctl daemon-reload",
    "systemctl enable tornado.service",
    "systemctl start tornado.service",
    "/opt/aws/amazon-cloudwatch-agent/bin/amazon-cloudwatch-agent-ctl -a fetch-config -m ec2 -c file:/opt/aws/amazon-cloudwatch-agent/bin/config.json -s",
];

/// The four externally supplied identifiers. None of them are validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackInputs {
    /// Existing VPC ID.
    pub network_id: String,
    /// AMI ID for the target region.
    pub image_id: String,
    /// EC2 key pair name.
    pub keypair_name: String,
    /// Existing security group ID.
    pub security_group_id: String,
}

impl StackInputs {
    /// Create inputs.
    #[must_use]
    pub fn new(
        network_id: impl Into<String>,
        image_id: impl Into<String>,
        keypair_name: impl Into<String>,
        security_group_id: impl Into<String>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            image_id: image_id.into(),
            keypair_name: keypair_name.into(),
            security_group_id: security_group_id.into(),
        }
    }

    /// Read inputs from context values.
    ///
    /// Returns `Ok(None)` when none of the keys are present, which selects the
    /// empty stack.
    ///
    /// # Errors
    /// Returns [`StackError::MissingContext`] when only some keys are present.
    pub fn from_context(context: &BTreeMap<String, String>) -> Result<Option<Self>> {
        let keys = [
            CONTEXT_VPC_ID,
            CONTEXT_AMI_ID,
            CONTEXT_KEY_NAME,
            CONTEXT_SECURITY_GROUP_ID,
        ];
        let values: Vec<Option<&String>> = keys.iter().map(|k| context.get(*k)).collect();

        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let missing: Vec<&str> = keys
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(StackError::MissingContext(missing.join(", ")));
        }

        let value = |i: usize| values[i].cloned().unwrap_or_default();
        Ok(Some(Self::new(value(0), value(1), value(2), value(3))))
    }
}

/// Knobs that are not part of the four inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackProps {
    /// Target account and region.
    pub env: StackEnv,
    /// Instance size.
    pub instance_type: InstanceType,
    /// Subnet type the instance is placed in.
    pub subnet_type: SubnetType,
    /// Regions the supplied AMI ID is valid in.
    pub image_regions: Vec<String>,
    /// Directory holding the host files.
    pub asset_dir: PathBuf,
}

/// Staged files, by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAssets {
    /// Tornado server script.
    pub server_script: Asset,
    /// systemd unit.
    pub service_unit: Asset,
    /// `CloudWatch` agent config.
    pub agent_config: Asset,
}

impl HostAssets {
    /// Assets paired with where the instance writes them, in fetch order.
    #[must_use]
    pub fn with_destinations(&self) -> [(&Asset, &'static str); 3] {
        [
            (&self.server_script, SERVER_SCRIPT.destination),
            (&self.service_unit, SERVICE_UNIT.destination),
            (&self.agent_config, AGENT_CONFIG.destination),
        ]
    }

    /// Assets in fetch order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Asset> {
        self.with_destinations()
            .into_iter()
            .map(|(asset, _)| asset.clone())
            .collect()
    }
}

/// Shell command fetching one staged file.
#[must_use]
pub fn fetch_command(asset: &Asset, destination: &str) -> Expr {
    Expr::join(
        " ",
        [
            Expr::literal("aws s3api get-object --bucket"),
            asset.bucket().clone(),
            Expr::literal("--key"),
            Expr::literal(asset.object_key()),
            Expr::literal(destination),
        ],
    )
}

/// The host's first-boot script.
///
/// Bucket and key of every file are baked in here, so the script is a fixed
/// value once the files are staged.
#[must_use]
pub fn boot_script(assets: &HostAssets) -> ProvisioningScript {
    let mut script = ProvisioningScript::for_linux();
    script.add_commands(INSTALL_TOOLS.iter().copied());
    script.add_commands(
        assets
            .with_destinations()
            .into_iter()
            .map(|(asset, destination)| fetch_command(asset, destination)),
    );
    script.add_commands(START_SERVICES.iter().copied());
    script
}

/// Everything synthesis produced for one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedStack {
    /// Stack name.
    pub stack_name: String,
    /// Target environment.
    pub env: StackEnv,
    /// The template.
    pub template: Template,
    /// Staged files.
    pub assets: Vec<Asset>,
    /// Resolved network, if the stack has inputs.
    pub network: Option<Network>,
    /// First-boot script, if the stack has inputs.
    pub boot_script: Option<ProvisioningScript>,
    /// Lookups the deploy tool still has to answer.
    pub missing: Vec<MissingLookup>,
}

/// The stack definition.
#[derive(Debug, Clone)]
pub struct Ec2DebianStack {
    name: String,
    props: StackProps,
}

impl Ec2DebianStack {
    /// Define a stack.
    #[must_use]
    pub fn new(name: impl Into<String>, props: StackProps) -> Self {
        Self {
            name: name.into(),
            props,
        }
    }

    /// Stack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assemble the stack.
    ///
    /// Without inputs the result is an empty template. Synthesis only reads
    /// the asset files and the cache; nothing is deployed.
    ///
    /// # Errors
    /// Returns an error if a lookup needs an account that is not configured,
    /// the image map lacks the target region, the VPC has no subnet of the
    /// configured type, or an asset file cannot be read.
    pub fn synthesize(
        &self,
        inputs: Option<&StackInputs>,
        cache: &ContextCache,
    ) -> Result<SynthesizedStack> {
        let env = &self.props.env;

        let Some(inputs) = inputs else {
            info!(stack = %self.name, "No stack inputs supplied, synthesizing an empty stack");
            return Ok(SynthesizedStack {
                stack_name: self.name.clone(),
                env: env.clone(),
                template: Template::new(),
                assets: Vec::new(),
                network: None,
                boot_script: None,
                missing: Vec::new(),
            });
        };

        info!(
            stack = %self.name,
            region = %env.region,
            vpc_id = %inputs.network_id,
            "Synthesizing stack"
        );

        let mut lookups = Lookups::new(cache);
        let network = lookups.vpc(env.account.as_deref(), &env.region, &inputs.network_id)?;

        let bucket = staging_bucket(env.account.as_deref(), &env.region);
        let stage = |file: HostFile| {
            Asset::stage(file.id, self.props.asset_dir.join(file.file_name), &bucket)
        };
        let assets = HostAssets {
            server_script: stage(SERVER_SCRIPT)?,
            service_unit: stage(SERVICE_UNIT)?,
            agent_config: stage(AGENT_CONFIG)?,
        };

        let mut role = RoleBuilder::new(ROLE_ID, EC2_SERVICE_PRINCIPAL)
            .managed_policy(ManagedPolicy::aws_managed(CLOUDWATCH_AGENT_SERVER_POLICY));
        for (asset, _) in assets.with_destinations() {
            role.grant_s3_read(asset.bucket(), &asset.object_key());
        }
        let role = role.build();

        let script = boot_script(&assets);

        let images = self
            .props
            .image_regions
            .iter()
            .map(|region| (region.clone(), inputs.image_id.clone()))
            .collect();
        let image = MachineImage::generic_linux(images);
        let image_id = image.image_for(&env.region)?;

        let security_group = SecurityGroup::from_security_group_id(&inputs.security_group_id);
        let subnet = network.select_subnet(self.props.subnet_type)?;

        let mut template = Template::new();
        for (id, resource) in role.resources()? {
            template.add_resource(id, resource)?;
        }

        let (profile_id, profile) = role.instance_profile(INSTANCE_ID)?;
        template.add_resource(profile_id.clone(), profile)?;

        let instance_id = logical_id(&[INSTANCE_ID, "Resource"]);
        let instance = InstanceProperties {
            availability_zone: subnet.availability_zone.clone(),
            iam_instance_profile: Expr::reference(profile_id),
            image_id: image_id.to_string(),
            instance_type: self.props.instance_type.clone(),
            key_name: inputs.keypair_name.clone(),
            security_group_ids: vec![security_group.id().to_string()],
            subnet_id: subnet.subnet_id.clone(),
            tags: vec![Tag {
                key: "Name".to_string(),
                value: format!("{}/{INSTANCE_ID}", self.name),
            }],
            user_data: script.to_user_data(),
        }
        .into_resource(role.dependency_ids())?;
        template.add_resource(instance_id.clone(), instance)?;

        template.add_output(
            OUTPUT_PRIVATE_IP,
            Output {
                value: Expr::get_att(&instance_id, ATTR_PRIVATE_IP),
                description: Some("Private IPv4 address of the instance".to_string()),
            },
        );
        template.add_output(
            OUTPUT_PUBLIC_IP,
            Output {
                value: Expr::get_att(&instance_id, ATTR_PUBLIC_IP),
                description: Some("Public IPv4 address of the instance".to_string()),
            },
        );

        let missing = lookups.into_missing();
        info!(
            stack = %self.name,
            resources = template.resources.len(),
            assets = HOST_FILES.len(),
            missing_lookups = missing.len(),
            "Stack synthesized"
        );

        Ok(SynthesizedStack {
            stack_name: self.name.clone(),
            env: env.clone(),
            template,
            assets: assets.to_vec(),
            network: Some(network),
            boot_script: Some(script),
            missing,
        })
    }
}
