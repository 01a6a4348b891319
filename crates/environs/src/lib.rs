//! # Stratus Environs
//!
//! Provisioning and teardown of the compute resources behind a cluster
//! environment, plus the small durable record needed to find the cluster's
//! control plane again after a restart.
//!
//! The provider-neutral contract is [`Environ`] / [`Instance`]; providers are
//! opened through an explicit [`ProviderRegistry`] built by the process entry
//! point. The [`ec2`] module implements the contract on an EC2-style compute
//! API:
//!
//! - security groups are reconciled to exactly the desired rule set
//! - instance listing tolerates eventual consistency and returns partial
//!   results rather than blocking on an instance that never shows up
//! - termination treats "already gone" as success
//! - bootstrap is recorded once in a blob store and refused if already present
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratus_environs::ProviderRegistry;
//! use stratus_environs::ec2::Ec2Provider;
//! # use stratus_environs::testing::{FakeConnector, FakeImageSelector};
//!
//! # async fn example() -> stratus_environs::Result<()> {
//! # let connector = Arc::new(FakeConnector::default());
//! # let images = Arc::new(FakeImageSelector::default());
//! let mut registry = ProviderRegistry::new();
//! registry.register("ec2", Arc::new(Ec2Provider::new(connector, images)))?;
//!
//! let environ = registry.open("ec2", "prod", serde_json::json!({ "region": "eu-west-1" }))?;
//! environ.bootstrap().await?;
//! let info = environ.state_info().await?;
//! println!("control plane at {:?}", info.addrs);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ec2;
mod environ;
mod error;
mod registry;
pub mod testing;

pub use environ::{Environ, EnvironProvider, Instance, InstanceId, InstanceLookup, StateInfo};
pub use error::{Error, Result};
pub use registry::ProviderRegistry;
