//! ec2 provider configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use stratus_resilience::RetryStrategy;
use tracing::trace;

use super::image::ImageConstraint;
use crate::{Error, Result};

/// Prefix of environment variables read by [`ProviderConfig::with_env_overrides`]
pub const ENV_PREFIX: &str = "STRATUS_EC2_";

/// A region and its service endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Region name
    pub name: &'static str,
    /// Compute endpoint
    pub ec2_endpoint: &'static str,
    /// Blob storage endpoint
    pub s3_endpoint: &'static str,
}

/// Regions the provider can open environments in
pub const REGIONS: &[Region] = &[
    Region {
        name: "us-east-1",
        ec2_endpoint: "https://ec2.us-east-1.amazonaws.com",
        s3_endpoint: "https://s3.amazonaws.com",
    },
    Region {
        name: "us-west-1",
        ec2_endpoint: "https://ec2.us-west-1.amazonaws.com",
        s3_endpoint: "https://s3-us-west-1.amazonaws.com",
    },
    Region {
        name: "us-west-2",
        ec2_endpoint: "https://ec2.us-west-2.amazonaws.com",
        s3_endpoint: "https://s3-us-west-2.amazonaws.com",
    },
    Region {
        name: "eu-west-1",
        ec2_endpoint: "https://ec2.eu-west-1.amazonaws.com",
        s3_endpoint: "https://s3-eu-west-1.amazonaws.com",
    },
    Region {
        name: "ap-southeast-1",
        ec2_endpoint: "https://ec2.ap-southeast-1.amazonaws.com",
        s3_endpoint: "https://s3-ap-southeast-1.amazonaws.com",
    },
    Region {
        name: "ap-northeast-1",
        ec2_endpoint: "https://ec2.ap-northeast-1.amazonaws.com",
        s3_endpoint: "https://s3-ap-northeast-1.amazonaws.com",
    },
    Region {
        name: "sa-east-1",
        ec2_endpoint: "https://ec2.sa-east-1.amazonaws.com",
        s3_endpoint: "https://s3-sa-east-1.amazonaws.com",
    },
];

impl Region {
    /// The region called `name`, if known
    #[must_use]
    pub fn lookup(name: &str) -> Option<&'static Region> {
        REGIONS.iter().find(|r| r.name == name)
    }
}

/// Settings for one ec2 environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Region name; must appear in [`REGIONS`]
    pub region: String,
    /// Environment security group is `<group_prefix>-<environment>`
    pub group_prefix: String,
    /// Instance type for new machines
    pub instance_type: String,
    /// Blob key of the bootstrap record
    pub state_key: String,
    /// Control-plane port: opened in the environment group and appended to
    /// control-plane addresses
    pub control_plane_port: u16,
    /// OS series of the machine image
    pub image_series: String,
    /// Architecture of the machine image
    pub image_arch: String,
    /// Budget for read-after-write lag
    pub short_attempt: RetryStrategy,
    /// Budget for address assignment
    pub long_attempt: RetryStrategy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            group_prefix: "stratus".to_string(),
            instance_type: "m1.small".to_string(),
            state_key: "provider-state".to_string(),
            control_plane_port: 2181,
            image_series: "precise".to_string(),
            image_arch: "amd64".to_string(),
            short_attempt: RetryStrategy::short(),
            long_attempt: RetryStrategy::long(),
        }
    }
}

impl ProviderConfig {
    /// Parse TOML; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::config(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Decode a JSON value as handed over by the provider registry; `null`
    /// means all defaults
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| Error::config(e.to_string()))
    }

    /// Apply `STRATUS_EC2_*` environment variables on top of `self`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            let value = lookup(&key);
            if value.is_some() {
                trace!(key = %key, "config override from environment");
            }
            value
        };

        if let Some(region) = var("REGION") {
            self.region = region;
        }
        if let Some(prefix) = var("GROUP_PREFIX") {
            self.group_prefix = prefix;
        }
        if let Some(instance_type) = var("INSTANCE_TYPE") {
            self.instance_type = instance_type;
        }
        if let Some(key) = var("STATE_KEY") {
            self.state_key = key;
        }
        if let Some(port) = var("CONTROL_PLANE_PORT") {
            self.control_plane_port = port
                .parse()
                .map_err(|e| Error::config(format!("{ENV_PREFIX}CONTROL_PLANE_PORT={port:?}: {e}")))?;
        }
        Ok(self)
    }

    /// Reject settings the provider cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.group_prefix.is_empty() {
            return Err(Error::config("group_prefix must not be empty"));
        }
        if self.state_key.is_empty() {
            return Err(Error::config("state_key must not be empty"));
        }
        if self.instance_type.is_empty() {
            return Err(Error::config("instance_type must not be empty"));
        }
        if self.control_plane_port == 0 {
            return Err(Error::config("control_plane_port must not be 0"));
        }
        self.short_attempt
            .validate()
            .map_err(|e| Error::config(format!("short_attempt: {e}")))?;
        self.long_attempt
            .validate()
            .map_err(|e| Error::config(format!("long_attempt: {e}")))?;
        Ok(())
    }

    /// The image constraint for new instances
    #[must_use]
    pub fn image_constraint(&self) -> ImageConstraint {
        ImageConstraint {
            region: self.region.clone(),
            series: self.image_series.clone(),
            arch: self.image_arch.clone(),
        }
    }
}
