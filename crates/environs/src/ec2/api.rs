//! The compute API surface the ec2 provider drives.
//!
//! Authentication, transport and request signing live behind [`ComputeApi`];
//! this module only fixes the calls, their payloads and the error codes the
//! provider reacts to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::InstanceId;

/// Error codes the provider treats specially
pub mod codes {
    /// A security group named in the request does not exist (yet)
    pub const GROUP_NOT_FOUND: &str = "InvalidGroup.NotFound";
    /// A security group with that name already exists
    pub const GROUP_DUPLICATE: &str = "InvalidGroup.Duplicate";
    /// At least one instance id in the request is unknown
    pub const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
    /// A permission being authorized is already present
    pub const PERMISSION_DUPLICATE: &str = "InvalidPermission.Duplicate";
    /// A permission being revoked is not present
    pub const PERMISSION_NOT_FOUND: &str = "InvalidPermission.NotFound";
}

/// Result type for compute API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Coarse classification of an [`ApiError`] code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The referenced resource does not exist
    NotFound,
    /// The resource being created already exists
    Duplicate,
    /// Anything else
    Other,
}

/// An error reported by the compute API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Machine-readable code, e.g. `InvalidGroup.NotFound`
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    /// Create an error with `code` and `message`
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the error carries exactly `code`
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// Classify the code
    #[must_use]
    pub fn kind(&self) -> ApiErrorKind {
        if self.code.ends_with(".NotFound") {
            ApiErrorKind::NotFound
        } else if self.code.ends_with(".Duplicate") {
            ApiErrorKind::Duplicate
        } else {
            ApiErrorKind::Other
        }
    }
}

/// Instance lifecycle state as reported by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    /// Being provisioned
    Pending,
    /// Up
    Running,
    /// Terminating
    ShuttingDown,
    /// Gone
    Terminated,
    /// Stopping
    Stopping,
    /// Stopped
    Stopped,
}

/// One instance as returned by run/describe calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance id
    pub id: InstanceId,
    /// Current state
    pub state: InstanceState,
    /// Public DNS name, once assigned
    pub dns_name: Option<String>,
}

/// Filter for describe-instances. Empty lists match everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceFilter {
    /// Accepted states
    pub states: Vec<InstanceState>,
    /// Only instances in this security group
    pub group_name: Option<String>,
    /// Only these ids
    pub ids: Vec<InstanceId>,
}

impl InstanceFilter {
    /// Instances that are pending or running
    #[must_use]
    pub fn live() -> Self {
        Self {
            states: vec![InstanceState::Pending, InstanceState::Running],
            ..Self::default()
        }
    }

    /// Restrict to members of `group`
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    /// Restrict to `ids`
    #[must_use]
    pub fn with_ids(mut self, ids: Vec<InstanceId>) -> Self {
        self.ids = ids;
        self
    }
}

/// A security group reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Provider id, e.g. `sg-1a2b3c`
    pub id: String,
    /// Group name
    pub name: String,
}

/// A security group used as the source of a permission
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceGroup {
    /// Group id; the only field that identifies the source
    pub id: String,
    /// Group name, if the API reported it
    pub name: Option<String>,
    /// Owning account, if the API reported it
    pub owner_id: Option<String>,
}

/// An ingress permission: a port range opened to CIDRs and/or groups
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IpPermission {
    /// `tcp`, `udp` or `icmp`
    pub protocol: String,
    /// First port of the range
    pub from_port: u16,
    /// Last port of the range
    pub to_port: u16,
    /// Source address ranges
    pub source_cidrs: Vec<String>,
    /// Source groups
    pub source_groups: Vec<SourceGroup>,
}

impl IpPermission {
    /// A tcp port range open to `cidr`
    pub fn tcp(from_port: u16, to_port: u16, cidr: impl Into<String>) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port,
            to_port,
            source_cidrs: vec![cidr.into()],
            source_groups: Vec::new(),
        }
    }
}

/// A security group with its current ingress rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupInfo {
    /// The group
    pub group: SecurityGroup,
    /// Free-form description set at creation
    pub description: String,
    /// Current ingress permissions
    pub permissions: Vec<IpPermission>,
}

/// Parameters of a run-instances call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstancesRequest {
    /// Machine image to boot
    pub image_id: String,
    /// Fewest instances to start
    pub min_count: u32,
    /// Most instances to start
    pub max_count: u32,
    /// Instance type, e.g. `m1.small`
    pub instance_type: String,
    /// Groups the instances join
    pub security_groups: Vec<SecurityGroup>,
    /// Opaque boot-time user data
    pub user_data: Option<Vec<u8>>,
}

/// Authenticated compute API client
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Start instances
    async fn run_instances(&self, request: &RunInstancesRequest) -> ApiResult<Vec<InstanceRecord>>;

    /// List instances matching `filter`
    async fn describe_instances(&self, filter: &InstanceFilter) -> ApiResult<Vec<InstanceRecord>>;

    /// Terminate instances. Fails as a whole if any id is unknown.
    async fn terminate_instances(&self, ids: &[InstanceId]) -> ApiResult<()>;

    /// Create a security group; fails with `InvalidGroup.Duplicate` if the
    /// name is taken
    async fn create_security_group(&self, name: &str, description: &str) -> ApiResult<SecurityGroup>;

    /// Fetch a security group and its rules by name
    async fn describe_security_group(&self, name: &str) -> ApiResult<SecurityGroupInfo>;

    /// Add ingress permissions to a group
    async fn authorize_security_group(
        &self,
        group: &SecurityGroup,
        permissions: &[IpPermission],
    ) -> ApiResult<()>;

    /// Remove ingress permissions from a group
    async fn revoke_security_group(
        &self,
        group: &SecurityGroup,
        permissions: &[IpPermission],
    ) -> ApiResult<()>;
}
