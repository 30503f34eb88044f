//! CloudFormation synthesis for a single Debian EC2 web host.
//!
//! The crate assembles one stack: an EC2 instance in an existing VPC, an
//! IAM role allowed to read three staged files and publish `CloudWatch`
//! metrics, and a first-boot script that installs a Tornado service and the
//! `CloudWatch` agent.
//!
//! Synthesis is a single pass with no cloud calls. It produces a template
//! and a cloud assembly directory; deploying that output is left to the
//! deploy tool.
//!
//! # Example
//!
//! ```rust,ignore
//! use ec2_debian_stack::{ContextCache, Ec2DebianStack, StackConfig, StackInputs};
//!
//! let config = StackConfig::load("stack.json".as_ref())?;
//! let stack = Ec2DebianStack::new(&config.stack_name, config.props());
//! let inputs = StackInputs::new("vpc-1", "ami-1", "key-1", "sg-1");
//! let synthesized = stack.synthesize(Some(&inputs), &ContextCache::default())?;
//! ec2_debian_stack::assembly::write(&synthesized, &config.output_dir)?;
//! ```

pub mod assembly;
pub mod asset;
pub mod aws;
pub mod config;
pub mod error;
pub mod lookup;
pub mod stack;
pub mod template;
pub mod user_data;

pub use config::{StackConfig, StackEnv};
pub use error::StackError;
pub use lookup::ContextCache;
pub use stack::{Ec2DebianStack, StackInputs, StackProps, SynthesizedStack};
pub use template::{Expr, Template};
