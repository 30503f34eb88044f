//! IAM role, policy and instance profile declarations.

use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::template::{logical_id, Expr, Resource};

/// Service principal for EC2 instances.
pub const EC2_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Managed policy that lets the `CloudWatch` agent publish metrics and logs.
pub const CLOUDWATCH_AGENT_SERVER_POLICY: &str = "CloudWatchAgentServerPolicy";

/// Actions granted by an S3 object read grant.
pub const S3_READ_ACTIONS: &[&str] = &["s3:GetObject*", "s3:GetBucket*", "s3:List*"];

const ROLE_TYPE: &str = "AWS::IAM::Role";
const POLICY_TYPE: &str = "AWS::IAM::Policy";
const INSTANCE_PROFILE_TYPE: &str = "AWS::IAM::InstanceProfile";

/// Serialize a single-element list as a scalar, the way IAM documents are
/// usually written.
fn one_or_many<T: Serialize, S: Serializer>(items: &[T], serializer: S) -> Result<S::Ok, S::Error> {
    match items {
        [single] => single.serialize(serializer),
        many => many.serialize(serializer),
    }
}

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Principal block of a trust policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Service principal, e.g. `ec2.amazonaws.com`.
    #[serde(rename = "Service")]
    pub service: String,
}

/// A policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Actions, e.g. `s3:GetObject*`.
    #[serde(serialize_with = "one_or_many")]
    pub action: Vec<String>,
    /// Allow or deny.
    pub effect: Effect,
    /// Principal, only set on trust policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    /// Resource ARNs.
    #[serde(serialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<Expr>,
}

impl PolicyStatement {
    /// Trust statement letting a service assume the role.
    #[must_use]
    pub fn assume_role(service: impl Into<String>) -> Self {
        Self {
            action: vec!["sts:AssumeRole".to_string()],
            effect: Effect::Allow,
            principal: Some(Principal {
                service: service.into(),
            }),
            resource: Vec::new(),
        }
    }

    /// Read access to one object in a bucket.
    ///
    /// Covers the bucket itself (for `GetBucket*`/`List*`) and the object.
    #[must_use]
    pub fn s3_object_read(bucket: &Expr, key: &str) -> Self {
        Self {
            action: S3_READ_ACTIONS.iter().map(ToString::to_string).collect(),
            effect: Effect::Allow,
            principal: None,
            resource: vec![s3_bucket_arn(bucket), s3_object_arn(bucket, key)],
        }
    }

    /// Whether this statement allows `action` on `resource`.
    ///
    /// Trailing `*` in the statement's actions is treated as a prefix match.
    #[must_use]
    pub fn allows(&self, action: &str, resource: &Expr) -> bool {
        self.effect == Effect::Allow
            && self.resource.contains(resource)
            && self.action.iter().any(|a| match a.strip_suffix('*') {
                Some(prefix) => action.starts_with(prefix),
                None => a == action,
            })
    }
}

/// An IAM policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Statements, in grant order.
    pub statement: Vec<PolicyStatement>,
    /// Policy language version.
    pub version: String,
}

impl PolicyDocument {
    /// Create a document from statements.
    #[must_use]
    pub fn new(statement: Vec<PolicyStatement>) -> Self {
        Self {
            statement,
            version: POLICY_VERSION.to_string(),
        }
    }
}

/// ARN of an S3 bucket.
#[must_use]
pub fn s3_bucket_arn(bucket: &Expr) -> Expr {
    Expr::join(
        "",
        [
            Expr::literal("arn:"),
            Expr::partition(),
            Expr::literal(":s3:::"),
            bucket.clone(),
        ],
    )
}

/// ARN of an S3 object.
#[must_use]
pub fn s3_object_arn(bucket: &Expr, key: &str) -> Expr {
    Expr::join("", [s3_bucket_arn(bucket), Expr::literal(format!("/{key}"))])
}

/// An AWS managed policy, referenced by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    name: String,
}

impl ManagedPolicy {
    /// Reference an AWS managed policy by name.
    #[must_use]
    pub fn aws_managed(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partition-aware policy ARN.
    #[must_use]
    pub fn arn(&self) -> Expr {
        Expr::join(
            "",
            [
                Expr::literal("arn:"),
                Expr::partition(),
                Expr::literal(format!(":iam::aws:policy/{}", self.name)),
            ],
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RoleProperties<'a> {
    assume_role_policy_document: &'a PolicyDocument,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    managed_policy_arns: Vec<Expr>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyProperties<'a> {
    policy_document: PolicyDocument,
    policy_name: &'a str,
    roles: Vec<Expr>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceProfileProperties {
    roles: Vec<Expr>,
}

/// Collects everything a role needs before it is handed to an instance.
///
/// Grants are added here rather than on the finished [`Role`], so the role's
/// permissions are complete before anything that boots with it is declared.
#[derive(Debug, Clone)]
pub struct RoleBuilder {
    id: String,
    assumed_by: String,
    managed_policies: Vec<ManagedPolicy>,
    statements: Vec<PolicyStatement>,
}

impl RoleBuilder {
    /// Start a role with construct id `id`, assumable by `service`.
    #[must_use]
    pub fn new(id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            assumed_by: service.into(),
            managed_policies: Vec::new(),
            statements: Vec::new(),
        }
    }

    /// Attach a managed policy.
    #[must_use]
    pub fn managed_policy(mut self, policy: ManagedPolicy) -> Self {
        self.managed_policies.push(policy);
        self
    }

    /// Add a statement to the role's inline default policy.
    pub fn add_statement(&mut self, statement: PolicyStatement) {
        if !self.statements.contains(&statement) {
            self.statements.push(statement);
        }
    }

    /// Grant read access to one S3 object.
    pub fn grant_s3_read(&mut self, bucket: &Expr, key: &str) {
        self.add_statement(PolicyStatement::s3_object_read(bucket, key));
    }

    /// Finish the role.
    #[must_use]
    pub fn build(self) -> Role {
        let role_id = logical_id(&[self.id.as_str(), "Resource"]);
        let policy_logical_id = if self.statements.is_empty() {
            None
        } else {
            Some(logical_id(&[self.id.as_str(), "DefaultPolicy", "Resource"]))
        };

        Role {
            id: self.id,
            logical_id: role_id,
            policy_logical_id,
            trust: PolicyDocument::new(vec![PolicyStatement::assume_role(self.assumed_by)]),
            managed_policies: self.managed_policies,
            statements: self.statements,
        }
    }
}

/// A finished role, ready to be referenced.
#[derive(Debug, Clone)]
pub struct Role {
    id: String,
    logical_id: String,
    policy_logical_id: Option<String>,
    trust: PolicyDocument,
    managed_policies: Vec<ManagedPolicy>,
    statements: Vec<PolicyStatement>,
}

impl Role {
    /// Construct id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Logical ID of the `AWS::IAM::Role` resource.
    #[must_use]
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Logical ID of the default policy, if the role has any grants.
    #[must_use]
    pub fn policy_logical_id(&self) -> Option<&str> {
        self.policy_logical_id.as_deref()
    }

    /// `Ref` to the role (its name).
    #[must_use]
    pub fn reference(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Trust policy.
    #[must_use]
    pub fn trust_policy(&self) -> &PolicyDocument {
        &self.trust
    }

    /// Attached managed policies.
    #[must_use]
    pub fn managed_policies(&self) -> &[ManagedPolicy] {
        &self.managed_policies
    }

    /// Inline grants.
    #[must_use]
    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// Whether any inline grant allows `action` on `resource`.
    #[must_use]
    pub fn allows(&self, action: &str, resource: &Expr) -> bool {
        self.statements.iter().any(|s| s.allows(action, resource))
    }

    /// Logical IDs a consumer of this role must depend on so that all grants
    /// exist before it starts.
    #[must_use]
    pub fn dependency_ids(&self) -> Vec<String> {
        let mut ids = vec![self.logical_id.clone()];
        ids.extend(self.policy_logical_id.clone());
        ids
    }

    /// Resources declaring this role and its default policy.
    ///
    /// # Errors
    /// Returns an error if a resource cannot be serialized.
    pub fn resources(&self) -> Result<Vec<(String, Resource)>> {
        let role = Resource::new(
            ROLE_TYPE,
            &RoleProperties {
                assume_role_policy_document: &self.trust,
                managed_policy_arns: self.managed_policies.iter().map(ManagedPolicy::arn).collect(),
            },
        )?;
        let mut resources = vec![(self.logical_id.clone(), role)];

        if let Some(policy_id) = &self.policy_logical_id {
            let policy = Resource::new(
                POLICY_TYPE,
                &PolicyProperties {
                    policy_document: PolicyDocument::new(self.statements.clone()),
                    policy_name: policy_id,
                    roles: vec![self.reference()],
                },
            )?;
            resources.push((policy_id.clone(), policy));
        }

        Ok(resources)
    }

    /// Instance profile wrapping this role, declared under `parent_id`.
    ///
    /// # Errors
    /// Returns an error if the resource cannot be serialized.
    pub fn instance_profile(&self, parent_id: &str) -> Result<(String, Resource)> {
        let id = logical_id(&[parent_id, "InstanceProfile"]);
        let resource = Resource::new(
            INSTANCE_PROFILE_TYPE,
            &InstanceProfileProperties {
                roles: vec![self.reference()],
            },
        )?;
        Ok((id, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket() -> Expr {
        Expr::literal("assets-bucket")
    }

    #[test]
    fn test_trust_policy_shape() {
        let role = RoleBuilder::new("Role", EC2_SERVICE_PRINCIPAL).build();
        assert_eq!(
            serde_json::to_value(role.trust_policy()).unwrap(),
            json!({
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": {"Service": "ec2.amazonaws.com"}
                }],
                "Version": "2012-10-17"
            })
        );
    }

    #[test]
    fn test_role_without_grants_has_no_policy() {
        let role = RoleBuilder::new("Role", EC2_SERVICE_PRINCIPAL).build();
        assert!(role.policy_logical_id().is_none());
        assert_eq!(role.resources().unwrap().len(), 1);
        assert_eq!(role.dependency_ids(), vec![role.logical_id().to_string()]);
    }

    #[test]
    fn test_managed_policy_arn_is_partition_aware() {
        let arn = ManagedPolicy::aws_managed(CLOUDWATCH_AGENT_SERVER_POLICY).arn();
        assert_eq!(
            serde_json::to_value(&arn).unwrap(),
            json!({"Fn::Join": ["", [
                "arn:",
                {"Ref": "AWS::Partition"},
                ":iam::aws:policy/CloudWatchAgentServerPolicy"
            ]]})
        );
    }

    #[test]
    fn test_grant_read_covers_bucket_and_object() {
        let mut builder = RoleBuilder::new("Role", EC2_SERVICE_PRINCIPAL);
        builder.grant_s3_read(&bucket(), "abc.py");
        let role = builder.build();

        let object = s3_object_arn(&bucket(), "abc.py");
        assert!(role.allows("s3:GetObject", &object));
        assert!(role.allows("s3:GetObjectVersion", &object));
        assert!(role.allows("s3:ListBucket", &s3_bucket_arn(&bucket())));
        assert!(!role.allows("s3:PutObject", &object));
        assert!(!role.allows("s3:GetObject", &s3_object_arn(&bucket(), "other.py")));
    }

    #[test]
    fn test_duplicate_grants_collapse() {
        let mut builder = RoleBuilder::new("Role", EC2_SERVICE_PRINCIPAL);
        builder.grant_s3_read(&bucket(), "abc.py");
        builder.grant_s3_read(&bucket(), "abc.py");
        assert_eq!(builder.build().statements().len(), 1);
    }

    #[test]
    fn test_policy_resource_attaches_to_role() {
        let mut builder = RoleBuilder::new("Role", EC2_SERVICE_PRINCIPAL);
        builder.grant_s3_read(&bucket(), "abc.py");
        let role = builder.build();
        let resources = role.resources().unwrap();
        assert_eq!(resources.len(), 2);

        let (policy_id, policy) = &resources[1];
        assert_eq!(policy.resource_type, "AWS::IAM::Policy");
        assert_eq!(policy.properties["PolicyName"], json!(policy_id));
        assert_eq!(
            policy.properties["Roles"],
            json!([{"Ref": role.logical_id()}])
        );
        assert_eq!(
            policy.properties["PolicyDocument"]["Statement"][0]["Resource"][1],
            serde_json::to_value(s3_object_arn(&bucket(), "abc.py")).unwrap()
        );
        assert_eq!(role.dependency_ids().len(), 2);
    }
}
