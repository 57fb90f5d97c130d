//! # cloudkit
//!
//! Upsert-style access to the serverless provider: execution roles and
//! their inline policies, artifact buckets, functions, schedule rules and
//! function invoke permissions.
//!
//! ## Example
//!
//! ```no_run
//! use cloudkit::{AwsCli, Provider};
//!
//! let provider = AwsCli::new(Some("eu-west-1".to_string()), None).expect("aws CLI missing");
//! match provider.get_role("job1").expect("lookup failed") {
//!     Some(role) => println!("{} -> {}", role.name, role.arn),
//!     None => println!("job1 is not deployed"),
//! }
//! ```
//!
//! ## Retry Logic
//!
//! Throttling and connectivity errors are retried inside [`AwsCli`] with
//! exponential backoff. Configure it with [`RetryConfig`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;

pub use backend::aws::AwsCli;
pub use backend::{Call, MockProvider, Provider};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use types::{
    CodeLocation, Function, FunctionSpec, ObjectInfo, PermissionSpec, RetryConfig, Role, Rule,
    RuleTarget,
};
