//! AWS resource declarations.
//!
//! ## Services
//!
//! - **EC2** - the instance, its image map and the imported security group
//! - **IAM** - the instance role, its default policy and instance profile

pub mod ec2;
pub mod iam;

pub use ec2::{InstanceType, MachineImage, SecurityGroup, SubnetType};
pub use iam::{ManagedPolicy, PolicyStatement, Role, RoleBuilder};
