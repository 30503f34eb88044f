//! EC2 instance, image and security group declarations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};
use crate::template::{Expr, Resource};

/// Resource type of an EC2 instance.
pub const INSTANCE_TYPE: &str = "AWS::EC2::Instance";

/// Instance attribute holding the private IPv4 address.
pub const ATTR_PRIVATE_IP: &str = "PrivateIp";

/// Instance attribute holding the public IPv4 address.
pub const ATTR_PUBLIC_IP: &str = "PublicIp";

/// Default instance size.
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.nano";

/// Instance size class, e.g. `t3.nano`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceType(String);

impl InstanceType {
    /// Wrap an instance type name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Instance type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceType {
    fn default() -> Self {
        Self::new(DEFAULT_INSTANCE_TYPE)
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A generic Linux image, chosen per region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineImage {
    images: BTreeMap<String, String>,
}

impl MachineImage {
    /// Image map from region to AMI ID.
    #[must_use]
    pub fn generic_linux(images: BTreeMap<String, String>) -> Self {
        Self { images }
    }

    /// Image map with a single region.
    #[must_use]
    pub fn single_region(region: impl Into<String>, ami: impl Into<String>) -> Self {
        Self::generic_linux(BTreeMap::from([(region.into(), ami.into())]))
    }

    /// AMI ID for `region`.
    ///
    /// # Errors
    /// Returns [`StackError::ImageNotMapped`] if the map has no entry for the
    /// region.
    pub fn image_for(&self, region: &str) -> Result<&str> {
        self.images
            .get(region)
            .map(String::as_str)
            .ok_or_else(|| StackError::ImageNotMapped {
                region: region.to_string(),
                mapped: self
                    .images
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Subnet group type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SubnetType {
    /// Routed through an internet gateway.
    Public,
    /// Routed through a NAT gateway.
    #[default]
    Private,
    /// No route to the internet.
    Isolated,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::Private => write!(f, "Private"),
            Self::Isolated => write!(f, "Isolated"),
        }
    }
}

/// An existing security group, imported by ID. Nothing is created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    id: String,
}

impl SecurityGroup {
    /// Import a security group by ID.
    #[must_use]
    pub fn from_security_group_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Security group ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    /// Tag key.
    #[serde(rename = "Key")]
    pub key: String,
    /// Tag value.
    #[serde(rename = "Value")]
    pub value: String,
}

/// `AWS::EC2::Instance` properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceProperties {
    /// Availability zone of the chosen subnet.
    pub availability_zone: String,
    /// Instance profile carrying the role.
    pub iam_instance_profile: Expr,
    /// AMI ID.
    pub image_id: String,
    /// Instance type.
    pub instance_type: InstanceType,
    /// Key pair name.
    pub key_name: String,
    /// Security group IDs.
    pub security_group_ids: Vec<String>,
    /// Subnet ID.
    pub subnet_id: String,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Base64-encoded first-boot script.
    pub user_data: Expr,
}

impl InstanceProperties {
    /// Declare the instance resource.
    ///
    /// # Errors
    /// Returns an error if the properties cannot be serialized.
    pub fn into_resource(self, depends_on: Vec<String>) -> Result<Resource> {
        Ok(Resource::new(INSTANCE_TYPE, &self)?.depends_on(depends_on))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_for_mapped_region() {
        let image = MachineImage::single_region("ap-northeast-1", "ami-1");
        assert_eq!(image.image_for("ap-northeast-1").unwrap(), "ami-1");
    }

    #[test]
    fn test_image_for_unmapped_region_fails() {
        let image = MachineImage::single_region("ap-northeast-1", "ami-1");
        let err = image.image_for("us-east-1").unwrap_err();
        assert!(matches!(
            &err,
            StackError::ImageNotMapped { region, mapped }
                if region == "us-east-1" && mapped == "ap-northeast-1"
        ));
    }

    #[test]
    fn test_subnet_type_serde() {
        let parsed: SubnetType = serde_json::from_value(json!("Public")).unwrap();
        assert_eq!(parsed, SubnetType::Public);
        assert_eq!(SubnetType::default().to_string(), "Private");
    }

    #[test]
    fn test_instance_properties_shape() {
        let props = InstanceProperties {
            availability_zone: "ap-northeast-1a".into(),
            iam_instance_profile: Expr::reference("InstanceProfile"),
            image_id: "ami-1".into(),
            instance_type: InstanceType::default(),
            key_name: "key-1".into(),
            security_group_ids: vec!["sg-1".into()],
            subnet_id: "subnet-1".into(),
            tags: vec![Tag {
                key: "Name".into(),
                value: "Stack/Instance".into(),
            }],
            user_data: Expr::base64(Expr::literal("#!/bin/bash")),
        };

        let resource = props.into_resource(vec!["Role".into()]).unwrap();
        assert_eq!(resource.resource_type, INSTANCE_TYPE);
        assert_eq!(resource.depends_on, vec!["Role"]);
        assert_eq!(resource.properties["InstanceType"], json!("t3.nano"));
        assert_eq!(resource.properties["SecurityGroupIds"], json!(["sg-1"]));
        assert_eq!(
            resource.properties["UserData"],
            json!({"Fn::Base64": "#!/bin/bash"})
        );
    }
}
